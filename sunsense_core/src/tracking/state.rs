//! User-facing tracking state and the events published on change.

use super::policy::{ColdStartRejection, IndoorSignal, ParkRelease};
use crate::notification::Alert;
use crate::types::{SessionEndReason, UvSession, VitaminDRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived mode, computed from the active lock and the last raw reading
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    OutsideTracking,
    /// Outdoor lock held while the last reading said inside or unknown
    OutsideLockedElsewhere,
    Inside,
    Vehicle,
    UnknownSettling,
    UnknownConfirmed,
}

impl TrackingState {
    pub fn is_outside(self) -> bool {
        matches!(
            self,
            TrackingState::OutsideTracking | TrackingState::OutsideLockedElsewhere
        )
    }
}

impl std::fmt::Display for TrackingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TrackingState::OutsideTracking => "outside (tracking)",
            TrackingState::OutsideLockedElsewhere => "outside (locked)",
            TrackingState::Inside => "inside",
            TrackingState::Vehicle => "vehicle",
            TrackingState::UnknownSettling => "unknown (settling)",
            TrackingState::UnknownConfirmed => "unknown",
        };
        f.write_str(label)
    }
}

/// Sampling timer status
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStatus {
    Stopped,
    Running,
    Paused,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackingEvent {
    StateChanged {
        from: TrackingState,
        to: TrackingState,
        at: DateTime<Utc>,
    },
    OutdoorLockAcquired {
        at: DateTime<Utc>,
    },
    VehicleLockAcquired {
        at: DateTime<Utc>,
    },
    VehicleLockReleased {
        reason: ParkRelease,
        at: DateTime<Utc>,
    },
    IndoorSignal {
        signal: IndoorSignal,
        at: DateTime<Utc>,
    },
    ColdStartRejected {
        reason: ColdStartRejection,
        at: DateTime<Utc>,
    },
    SessionStarted {
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    SessionEnded {
        session_id: Uuid,
        reason: SessionEndReason,
        session_sed: f64,
        at: DateTime<Utc>,
    },
    ExposureUpdated {
        session_sed: f64,
        exposure_ratio: f64,
        uv_index: f64,
        at: DateTime<Utc>,
    },
    VitaminDUpdated {
        total_iu: f64,
        target_iu: f64,
        at: DateTime<Utc>,
    },
    IntervalChanged {
        interval_secs: i64,
        at: DateTime<Utc>,
    },
    Alert {
        alert: Alert,
        at: DateTime<Utc>,
    },
}

/// Point-in-time view for status displays
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackingSnapshot {
    pub state: TrackingState,
    pub outdoor_locked: bool,
    pub vehicle_locked: bool,
    pub sampling: SamplingStatus,
    pub interval_secs: i64,
    pub next_tick_due: Option<DateTime<Utc>>,
    pub session: Option<UvSession>,
    pub exposure_ratio: f64,
    pub vitamin_d: Option<VitaminDRecord>,
    pub sunscreen_active: bool,
    pub manual_override: bool,
    pub taken_at: DateTime<Utc>,
}
