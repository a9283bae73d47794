//! Tracing setup shared by the core and the CLI.
//!
//! Logs always go to stderr: the CLI prints events and reports on stdout
//! and those must stay machine-readable.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the subscriber at INFO unless `RUST_LOG` says otherwise
pub fn init() {
    init_with_level("info")
}

/// Install the subscriber with `default_level` as the fallback filter.
///
/// `RUST_LOG` still wins when set. Calling this twice is harmless; the
/// second subscriber is simply not installed.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
}

/// Filter level for a `-v` repeat count
pub fn verbosity_level(count: u8) -> &'static str {
    match count {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
