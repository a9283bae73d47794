#![forbid(unsafe_code)]

//! Core domain model and tracking logic for the Sunsense system.
//!
//! This crate provides:
//! - Domain types (observations, sessions, vitamin-D records, streaks)
//! - Exposure calculator (SED, vitamin D, sampling interval)
//! - Session store and notification gate
//! - Location-mode tracking state machine and its actor service
//! - Collaborator traits (backend, UV source, notifier) with local implementations
//! - Persistence (atomic JSON, CSV export), configuration, logging

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod persist;
pub mod solar;
pub mod exposure;
pub mod weather;
pub mod backend;
pub mod sunscreen;
pub mod session_store;
pub mod notification;
pub mod streaks;
pub mod tracking;
pub mod scheduler;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use backend::{Backend, FileBackend, MemoryBackend};
pub use notification::{Alert, LogNotifier, NotificationGate, Notifier, RecordingNotifier};
pub use session_store::SessionStore;
pub use sunscreen::SunscreenState;
pub use tracking::{Collaborators, Orchestrator, TrackingEvent, TrackingSnapshot, TrackingState};
pub use scheduler::{Clock, SystemClock, TrackingHandle, TrackingService};
pub use weather::{ClearSkyUvModel, FixedUvSource, UvCache, UvIndexSource};
