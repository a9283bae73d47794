//! Error types for the sunsense_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sunsense_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No user identity could be resolved; the cycle is skipped
    #[error("no active user")]
    NoActiveUser,

    /// A backend read or write failed; the cycle is treated as a no-op
    #[error("backend unavailable: {0}")]
    TransientBackend(String),

    /// UV index fetch failed and no cached value exists yet
    #[error("UV index unavailable and no cached value")]
    StaleCache,

    /// Malformed or contradictory observation; previous state is retained
    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means "skip this cycle" rather than a real fault.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::NoActiveUser
                | Error::TransientBackend(_)
                | Error::StaleCache
                | Error::InvalidObservation(_)
        )
    }
}
