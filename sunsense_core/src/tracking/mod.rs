//! Location-mode tracking state machine.
//!
//! - [`lock`]: outdoor/vehicle locks and signal history
//! - [`policy`]: the prioritized transition rules
//! - [`orchestrator`]: applies decisions, owns the session and sampling timer
//! - [`state`]: derived user-facing state and published events

pub mod lock;
pub mod orchestrator;
pub mod policy;
pub mod state;

pub use lock::{ActiveLock, Lock, SignalHistory};
pub use orchestrator::{Collaborators, MaintenanceReport, Orchestrator};
pub use policy::{ColdStartRejection, Decision, IndoorSignal, ParkRelease};
pub use state::{SamplingStatus, TrackingEvent, TrackingSnapshot, TrackingState};
