//! Transition policy for location-mode observations.
//!
//! Pure function of the observation, the current lock, the signal history
//! and the clock. Rules are checked in priority order:
//!
//! 1. **Manual override** → force inside, dropping any lock
//! 2. **Vehicle** at or above `vehicle_confidence` → enter vehicle at once;
//!    weaker vehicle samples are ignored outright
//! 3. **Vehicle lock held** → everything else is ignored until the car is
//!    parked (long lock, quiet lock, near-zero speed) or the user is seen
//!    walking outside; either releases the lock and evaluation continues
//! 4. **Outside at night** → treated as inside
//! 5. **Outside, outdoor lock held** → continue without a confidence check
//! 6. **Outside, no lock** → cold start: `cold_start_confidence` plus a
//!    building-distance check unless corroborated
//! 7. **Unknown** → hold a held lock through a short debounce window if an
//!    outside reading came just before; otherwise time out
//! 8. **Inside, outdoor lock held** → only a strong indoor signal releases
//! 9. **Inside, no lock** → `steady_confidence` confirms inside

use super::lock::{ActiveLock, SignalHistory};
use crate::config::TrackingConfig;
use crate::types::{LocationMode, LocationObservation};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Evidence strong enough to end an outdoor lock on an inside reading
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndoorSignal {
    FloorChange,
    PolygonOccupancy,
    NearBuildingStationary,
    HighConfidence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdStartRejection {
    LowConfidence,
    NearBuilding,
}

/// Why a vehicle lock was let go
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkRelease {
    Parked,
    WalkedAway,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    ForceInside,
    EnterVehicle,
    IgnoreVehicleSample,
    HoldVehicle,
    Night,
    ContinueOutdoor,
    StartOutdoor,
    RejectColdStart(ColdStartRejection),
    UnknownHold,
    UnknownTimeout,
    Unknown,
    ReleaseIndoor(IndoorSignal),
    IgnoreWeakInside,
    ConfirmInside,
    IgnoreLowConfidenceInside,
}

impl Decision {
    /// Whether the observation is dropped without touching any history
    pub fn is_discarded(self) -> bool {
        matches!(self, Decision::IgnoreVehicleSample)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Evaluation {
    /// Set when rule 3 let the vehicle lock go before the decision was made
    pub vehicle_released: Option<ParkRelease>,
    pub decision: Decision,
}

pub struct PolicyInput<'a> {
    pub observation: &'a LocationObservation,
    pub lock: &'a ActiveLock,
    /// History already advanced by `observation`
    pub signals: &'a SignalHistory,
    pub manual_override: bool,
    pub daytime: bool,
    pub config: &'a TrackingConfig,
}

pub fn evaluate(input: &PolicyInput<'_>) -> Evaluation {
    let obs = input.observation;
    let config = input.config;

    // Rule 1
    if input.manual_override {
        return decided(None, Decision::ForceInside);
    }

    // Rule 2
    if obs.mode == LocationMode::Vehicle {
        let decision = if obs.confidence >= config.vehicle_confidence {
            Decision::EnterVehicle
        } else {
            Decision::IgnoreVehicleSample
        };
        return decided(None, decision);
    }

    // Rule 3
    let mut lock = *input.lock;
    let mut vehicle_released = None;
    if let Some(vehicle) = lock.vehicle() {
        match park_release(obs, vehicle.held_for(obs.timestamp), vehicle.quiet_for(obs.timestamp), config) {
            Some(release) => {
                vehicle_released = Some(release);
                lock = ActiveLock::None;
            }
            None => return decided(None, Decision::HoldVehicle),
        }
    }

    let decision = match obs.mode {
        // Rules 4-6
        LocationMode::Outside => {
            if !input.daytime {
                Decision::Night
            } else if lock.is_outdoor() {
                Decision::ContinueOutdoor
            } else {
                match cold_start(obs, input.signals, config) {
                    Ok(()) => Decision::StartOutdoor,
                    Err(reason) => Decision::RejectColdStart(reason),
                }
            }
        }
        // Rule 7
        LocationMode::Unknown => {
            if lock.is_outdoor() {
                unknown_hold(obs.timestamp, input.signals, config)
            } else {
                Decision::Unknown
            }
        }
        // Rules 8-9
        LocationMode::Inside => {
            if lock.is_outdoor() {
                match strong_indoor_signal(obs, input.signals, config) {
                    Some(signal) => Decision::ReleaseIndoor(signal),
                    None => Decision::IgnoreWeakInside,
                }
            } else if obs.confidence >= config.steady_confidence {
                Decision::ConfirmInside
            } else {
                Decision::IgnoreLowConfidenceInside
            }
        }
        LocationMode::Vehicle => Decision::IgnoreVehicleSample,
    };

    decided(vehicle_released, decision)
}

/// Rule 7 for a held outdoor lock; also used when a tick finds the hold expired
pub fn unknown_hold(now: DateTime<Utc>, signals: &SignalHistory, config: &TrackingConfig) -> Decision {
    let Some(since) = signals.unknown_since else {
        return Decision::UnknownHold;
    };
    let within_debounce = now - since <= Duration::seconds(config.unknown_debounce_secs);
    let preceded_by_outside = signals
        .last_outside_at
        .is_some_and(|at| at <= since && since - at <= Duration::seconds(config.outside_recency_secs));

    if within_debounce && preceded_by_outside {
        Decision::UnknownHold
    } else {
        Decision::UnknownTimeout
    }
}

fn decided(vehicle_released: Option<ParkRelease>, decision: Decision) -> Evaluation {
    Evaluation {
        vehicle_released,
        decision,
    }
}

fn park_release(
    obs: &LocationObservation,
    held: Duration,
    quiet: Duration,
    config: &TrackingConfig,
) -> Option<ParkRelease> {
    if obs.mode == LocationMode::Outside && obs.activity.is_on_foot() {
        return Some(ParkRelease::WalkedAway);
    }

    let stopped = obs.speed.is_some_and(|s| s <= config.parked_speed_mps);
    if held >= Duration::seconds(config.vehicle_park_min_lock_secs)
        && quiet >= Duration::seconds(config.vehicle_park_quiet_secs)
        && stopped
    {
        return Some(ParkRelease::Parked);
    }
    None
}

fn cold_start(
    obs: &LocationObservation,
    signals: &SignalHistory,
    config: &TrackingConfig,
) -> std::result::Result<(), ColdStartRejection> {
    if obs.confidence < config.cold_start_confidence {
        return Err(ColdStartRejection::LowConfidence);
    }

    let near_building = obs
        .nearest_building_distance
        .is_some_and(|d| d < config.min_building_distance_m);
    if near_building && !corroborated(obs, signals, config) {
        return Err(ColdStartRejection::NearBuilding);
    }
    Ok(())
}

/// Independent evidence that an outside reading next to a building is real
fn corroborated(obs: &LocationObservation, signals: &SignalHistory, config: &TrackingConfig) -> bool {
    let recent_exit = signals
        .last_polygon_exit_at
        .is_some_and(|at| obs.timestamp - at <= Duration::seconds(config.polygon_exit_window_secs));

    let moving_with_good_fix = obs.activity.is_on_foot()
        && obs.accuracy.is_some_and(|a| a <= config.good_accuracy_m)
        && obs.confidence >= config.corroborated_confidence;

    recent_exit || moving_with_good_fix
}

fn strong_indoor_signal(
    obs: &LocationObservation,
    signals: &SignalHistory,
    config: &TrackingConfig,
) -> Option<IndoorSignal> {
    let now = obs.timestamp;

    if signals
        .last_floor_change_at
        .is_some_and(|at| at <= now && now - at <= Duration::seconds(config.floor_change_window_secs))
    {
        return Some(IndoorSignal::FloorChange);
    }
    if obs.is_inside_polygon
        && signals
            .polygon_entered_at
            .is_some_and(|at| now - at >= Duration::seconds(config.polygon_occupancy_secs))
    {
        return Some(IndoorSignal::PolygonOccupancy);
    }
    if signals
        .near_building_stationary_since
        .is_some_and(|at| now - at >= Duration::seconds(config.near_building_stationary_secs))
    {
        return Some(IndoorSignal::NearBuildingStationary);
    }
    if obs.confidence >= config.strong_indoor_confidence {
        return Some(IndoorSignal::HighConfidence);
    }
    None
}
