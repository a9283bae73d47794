//! Configuration file support for Sunsense.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/sunsense/config.toml`.

use crate::{Error, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub exposure: ExposureConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub sunscreen: SunscreenConfig,

    #[serde(default)]
    pub background: BackgroundConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Offset used to decide where one calendar day ends
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            utc_offset_minutes: 0,
        }
    }
}

impl DataConfig {
    /// Offset for calendar-day boundaries; falls back to UTC when out of range
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

/// Location-mode classification thresholds and timing windows
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub vehicle_confidence: f64,
    pub cold_start_confidence: f64,
    pub steady_confidence: f64,
    pub strong_indoor_confidence: f64,
    pub corroborated_confidence: f64,
    pub min_building_distance_m: f64,
    pub good_accuracy_m: f64,
    pub polygon_exit_window_secs: i64,
    pub floor_change_window_secs: i64,
    pub polygon_occupancy_secs: i64,
    pub near_building_m: f64,
    pub near_building_stationary_secs: i64,
    pub unknown_debounce_secs: i64,
    pub outside_recency_secs: i64,
    pub vehicle_park_min_lock_secs: i64,
    pub vehicle_park_quiet_secs: i64,
    pub parked_speed_mps: f64,
    pub min_daylight_elevation_deg: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            vehicle_confidence: 0.85,
            cold_start_confidence: 0.75,
            steady_confidence: 0.65,
            strong_indoor_confidence: 0.90,
            corroborated_confidence: 0.80,
            min_building_distance_m: 30.0,
            good_accuracy_m: 20.0,
            polygon_exit_window_secs: 60,
            floor_change_window_secs: 60,
            polygon_occupancy_secs: 60,
            near_building_m: 10.0,
            near_building_stationary_secs: 120,
            unknown_debounce_secs: 30,
            outside_recency_secs: 120,
            vehicle_park_min_lock_secs: 180,
            vehicle_park_quiet_secs: 120,
            parked_speed_mps: 0.5,
            min_daylight_elevation_deg: 0.0,
        }
    }
}

/// Exposure integration parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub uv_cache_ttl_secs: i64,
    /// A delayed tick is credited with at most this many sampling intervals
    pub max_gap_intervals: u32,
    /// Absolute ceiling on the span one tick may credit
    pub max_tick_secs: i64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            uv_cache_ttl_secs: 300,
            max_gap_intervals: 2,
            max_tick_secs: 600,
        }
    }
}

/// Session store sync policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub vitamin_d_sync_interval_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vitamin_d_sync_interval_secs: 120,
        }
    }
}

/// Alert thresholds and cooldowns
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub warning_threshold: f64,
    pub danger_threshold: f64,
    pub warning_cooldown_secs: i64,
    pub danger_cooldown_secs: i64,
    pub morning_peak_min_uv: f64,
    pub morning_alert_hour: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.75,
            danger_threshold: 1.0,
            warning_cooldown_secs: 600,
            danger_cooldown_secs: 120,
            morning_peak_min_uv: 6.0,
            morning_alert_hour: 8,
        }
    }
}

/// Sunscreen protection window
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SunscreenConfig {
    pub protection_minutes: i64,
}

impl Default for SunscreenConfig {
    fn default() -> Self {
        Self {
            protection_minutes: 120,
        }
    }
}

/// Background wake scheduling
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub wake_budget_secs: u64,
    pub wake_interval_secs: i64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            wake_budget_secs: 25,
            wake_interval_secs: 900,
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|_| PathBuf::from("."))
    });
    base.join("sunsense")
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from("."))
        });
        base.join("sunsense").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let t = &self.tracking;
        for (name, value) in [
            ("vehicle_confidence", t.vehicle_confidence),
            ("cold_start_confidence", t.cold_start_confidence),
            ("steady_confidence", t.steady_confidence),
            ("strong_indoor_confidence", t.strong_indoor_confidence),
            ("corroborated_confidence", t.corroborated_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "tracking.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if t.cold_start_confidence < t.steady_confidence {
            return Err(Error::Config(format!(
                "tracking.cold_start_confidence ({}) must not be below steady_confidence ({})",
                t.cold_start_confidence, t.steady_confidence
            )));
        }

        if t.unknown_debounce_secs <= 0 {
            return Err(Error::Config(
                "tracking.unknown_debounce_secs must be positive".into(),
            ));
        }

        let n = &self.notifications;
        if n.warning_threshold >= n.danger_threshold {
            return Err(Error::Config(format!(
                "notifications.warning_threshold ({}) must be below danger_threshold ({})",
                n.warning_threshold, n.danger_threshold
            )));
        }

        if n.morning_alert_hour > 23 {
            return Err(Error::Config(
                "notifications.morning_alert_hour must be 0-23".into(),
            ));
        }

        if self.exposure.max_gap_intervals == 0 {
            return Err(Error::Config(
                "exposure.max_gap_intervals must be at least 1".into(),
            ));
        }

        if self.exposure.max_tick_secs <= 0 {
            return Err(Error::Config(
                "exposure.max_tick_secs must be positive".into(),
            ));
        }

        if FixedOffset::east_opt(self.data.utc_offset_minutes * 60).is_none() {
            return Err(Error::Config(format!(
                "data.utc_offset_minutes out of range: {}",
                self.data.utc_offset_minutes
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tracking.cold_start_confidence, 0.75);
        assert_eq!(config.tracking.vehicle_confidence, 0.85);
        assert_eq!(config.session.vitamin_d_sync_interval_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(
            config.tracking.unknown_debounce_secs,
            parsed.tracking.unknown_debounce_secs
        );
        assert_eq!(config.data.data_dir, parsed.data.data_dir);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[tracking]
cold_start_confidence = 0.85
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tracking.cold_start_confidence, 0.85);
        assert_eq!(config.tracking.steady_confidence, 0.65); // default
        assert_eq!(config.notifications.danger_cooldown_secs, 120); // default
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.tracking.cold_start_confidence = 0.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.notifications.warning_threshold = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_ceiling() {
        let config: Config = toml::from_str("[exposure]\nmax_gap_intervals = 3\n").unwrap();
        assert_eq!(config.exposure.max_tick_secs, 600);

        let mut config = Config::default();
        config.exposure.max_tick_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.data.utc_offset_minutes = 120;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.data.utc_offset_minutes, 120);
        assert_eq!(loaded.data.utc_offset(), FixedOffset::east_opt(7200).unwrap());
    }
}
