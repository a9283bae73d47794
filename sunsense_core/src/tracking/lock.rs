//! Tracking locks and the signal history the policy reads.

use crate::config::TrackingConfig;
use crate::types::{Activity, LocationMode, LocationObservation};
use chrono::{DateTime, Duration, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lock {
    pub activated_at: DateTime<Utc>,
    /// Last observation that agreed with the lock
    pub last_corroborated_at: DateTime<Utc>,
}

impl Lock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            activated_at: at,
            last_corroborated_at: at,
        }
    }

    pub fn corroborate(&mut self, at: DateTime<Utc>) {
        if at > self.last_corroborated_at {
            self.last_corroborated_at = at;
        }
    }

    pub fn held_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.activated_at
    }

    pub fn quiet_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_corroborated_at
    }
}

/// At most one lock exists at a time; taking the vehicle lock drops the outdoor one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActiveLock {
    #[default]
    None,
    Outdoor(Lock),
    Vehicle(Lock),
}

impl ActiveLock {
    pub fn is_outdoor(&self) -> bool {
        matches!(self, ActiveLock::Outdoor(_))
    }

    pub fn is_vehicle(&self) -> bool {
        matches!(self, ActiveLock::Vehicle(_))
    }

    pub fn outdoor(&self) -> Option<&Lock> {
        match self {
            ActiveLock::Outdoor(lock) => Some(lock),
            _ => None,
        }
    }

    pub fn vehicle(&self) -> Option<&Lock> {
        match self {
            ActiveLock::Vehicle(lock) => Some(lock),
            _ => None,
        }
    }

    pub fn corroborate(&mut self, at: DateTime<Utc>) {
        match self {
            ActiveLock::Outdoor(lock) | ActiveLock::Vehicle(lock) => lock.corroborate(at),
            ActiveLock::None => {}
        }
    }
}

/// Timestamps of past signals, advanced once per accepted observation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignalHistory {
    pub last_outside_at: Option<DateTime<Utc>>,
    pub polygon_entered_at: Option<DateTime<Utc>>,
    pub last_polygon_exit_at: Option<DateTime<Utc>>,
    pub last_floor_change_at: Option<DateTime<Utc>>,
    pub near_building_stationary_since: Option<DateTime<Utc>>,
    pub unknown_since: Option<DateTime<Utc>>,
}

impl SignalHistory {
    /// History as it stands once `obs` is taken into account
    pub fn advanced(&self, obs: &LocationObservation, config: &TrackingConfig) -> Self {
        let mut next = self.clone();
        let at = obs.timestamp;

        match (self.polygon_entered_at, obs.is_inside_polygon) {
            (None, true) => next.polygon_entered_at = Some(at),
            (Some(_), false) => {
                next.polygon_entered_at = None;
                next.last_polygon_exit_at = Some(at);
            }
            _ => {}
        }

        let near_and_still = obs.activity == Activity::Stationary
            && obs
                .nearest_building_distance
                .is_some_and(|d| d <= config.near_building_m);
        next.near_building_stationary_since = match (near_and_still, self.near_building_stationary_since) {
            (true, Some(since)) => Some(since),
            (true, None) => Some(at),
            (false, _) => None,
        };

        match obs.mode {
            LocationMode::Unknown => {
                next.unknown_since.get_or_insert(at);
            }
            LocationMode::Outside => {
                next.unknown_since = None;
                next.last_outside_at = Some(at);
            }
            LocationMode::Inside | LocationMode::Vehicle => next.unknown_since = None,
        }

        next
    }

    pub fn note_floor_change(&mut self, at: DateTime<Utc>) {
        self.last_floor_change_at = Some(at);
    }

    /// How long the current unknown streak has lasted at `now`
    pub fn unknown_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.unknown_since.map(|since| now - since)
    }
}
