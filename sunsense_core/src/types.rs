//! Core domain types for the Sunsense system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Location observations produced by the sensor layer
//! - Persisted entities (UV sessions, vitamin-D records, streaks)
//! - User profile and per-feature settings

use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Observation Types
// ============================================================================

/// Location mode estimated by the sensor fusion layer
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    Outside,
    Inside,
    Vehicle,
    Unknown,
}

/// Motion activity classification
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Stationary,
    Walking,
    Running,
    #[default]
    Other,
}

impl Activity {
    /// Walking or running on foot
    pub fn is_on_foot(self) -> bool {
        matches!(self, Activity::Walking | Activity::Running)
    }
}

/// A single `(mode, confidence)` estimate plus the raw signals behind it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocationObservation {
    pub mode: LocationMode,
    pub confidence: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub activity: Activity,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub nearest_building_distance: Option<f64>,
    #[serde(default)]
    pub is_inside_polygon: bool,
    pub timestamp: DateTime<Utc>,
}

impl LocationObservation {
    /// Reject malformed values before they reach the state machine
    pub fn validate(&self) -> Result<()> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::InvalidObservation(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::InvalidObservation(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::InvalidObservation(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        for (name, value) in [
            ("accuracy", self.accuracy),
            ("speed", self.speed),
            ("nearest_building_distance", self.nearest_building_distance),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::InvalidObservation(format!(
                        "{} must be a non-negative number, got {}",
                        name, v
                    )));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Skin Type
// ============================================================================

/// Fitzpatrick skin type (1-6)
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub struct SkinType(u8);

impl SkinType {
    pub fn new(value: u8) -> Result<Self> {
        if (1..=6).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::Config(format!(
                "Fitzpatrick skin type must be 1-6, got {}",
                value
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Relative vitamin-D synthesis efficiency; darker skin yields less
    pub fn synthesis_efficiency(self) -> f64 {
        match self.0 {
            1 => 1.0,
            2 => 0.9,
            3 => 0.75,
            4 => 0.6,
            5 => 0.4,
            _ => 0.25,
        }
    }

    /// Typical minimal erythema dose in hundredths of an SED
    pub fn default_med(self) -> u32 {
        match self.0 {
            1 => 200,
            2 => 250,
            3 => 300,
            4 => 450,
            5 => 600,
            _ => 1000,
        }
    }
}

impl Default for SkinType {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for SkinType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SkinType> for u8 {
    fn from(skin: SkinType) -> u8 {
        skin.0
    }
}

// ============================================================================
// Persisted Entities
// ============================================================================

/// Why a UV session was closed
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Indoor,
    Vehicle,
    Sunscreen,
    ManualOverride,
    UnknownTimeout,
    Night,
    DayRollover,
    Maintenance,
    Replaced,
    Recovery,
}

/// One continuous span of outdoor UV accumulation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UvSession {
    pub id: Uuid,
    pub user_id: String,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub session_sed: f64,
    pub sunscreen_applied: bool,
    pub created_at: DateTime<Utc>,
}

impl UvSession {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

/// A user's vitamin-D accumulation for one calendar day
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VitaminDRecord {
    pub id: Uuid,
    pub user_id: String,
    pub date: NaiveDate,
    pub total_iu: f64,
    pub target_iu: f64,
    pub body_exposure_factor: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VitaminDRecord {
    /// Fraction of the daily target reached (unclamped)
    pub fn progress(&self) -> f64 {
        if self.target_iu > 0.0 {
            self.total_iu / self.target_iu
        } else {
            0.0
        }
    }

    pub fn target_met(&self) -> bool {
        self.target_iu > 0.0 && self.total_iu >= self.target_iu
    }
}

/// Consecutive-day streak counters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Streaks {
    pub id: Uuid,
    pub user_id: String,
    pub uv_safe_streak: u32,
    pub vitamin_d_streak: u32,
    /// Last calendar day folded into the counters
    pub last_updated: Option<NaiveDate>,
}

impl Streaks {
    pub fn new(user_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            uv_safe_streak: 0,
            vitamin_d_streak: 0,
            last_updated: None,
        }
    }
}

/// User profile fields the tracking core needs
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub user_id: String,
    #[serde(default)]
    pub skin_type: SkinType,
    /// Minimal erythema dose in hundredths of an SED; skin-type default when absent
    #[serde(default)]
    pub med: Option<u32>,
    #[serde(default = "default_vitamin_d_target")]
    pub vitamin_d_target_iu: f64,
    #[serde(default = "default_body_exposure_factor")]
    pub body_exposure_factor: f64,
}

fn default_vitamin_d_target() -> f64 {
    1000.0
}

fn default_body_exposure_factor() -> f64 {
    0.25
}

impl Profile {
    pub fn new(user_id: &str, skin_type: SkinType) -> Self {
        Self {
            user_id: user_id.to_string(),
            skin_type,
            med: None,
            vitamin_d_target_iu: default_vitamin_d_target(),
            body_exposure_factor: default_body_exposure_factor(),
        }
    }

    pub fn effective_med(&self) -> u32 {
        self.med.unwrap_or_else(|| self.skin_type.default_med())
    }
}

/// Per-feature enable flags
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeatureSettings {
    #[serde(default = "enabled")]
    pub vitamin_d_tracking: bool,
    #[serde(default = "enabled")]
    pub notifications: bool,
    #[serde(default = "enabled")]
    pub morning_peak_alert: bool,
}

fn enabled() -> bool {
    true
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            vitamin_d_tracking: true,
            notifications: true,
            morning_peak_alert: true,
        }
    }
}

/// One point of a UV index forecast
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub time: DateTime<Utc>,
    pub uv_index: f64,
}

/// Calendar day of `instant` at the configured UTC offset
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}
