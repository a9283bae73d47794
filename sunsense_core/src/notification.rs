//! Notification gate.
//!
//! Decides which alerts are due from the current exposure ratio and
//! vitamin-D progress. Cooldowns live here and are independent of session
//! boundaries: re-entering outdoor mode inside a cooldown window does not
//! re-fire the same alert. Delivery belongs to a [`Notifier`].

use crate::config::NotificationConfig;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    Warning { ratio: f64 },
    Danger { ratio: f64 },
    VitaminDTargetReached,
    MorningPeak { at: DateTime<Utc>, uv_index: f64 },
}

/// Delivery collaborator; calls are fire-and-forget
pub trait Notifier: Send + Sync {
    fn send_warning(&self, ratio: f64);
    fn send_danger(&self, ratio: f64);
    fn send_vitamin_d_target_reached(&self);
    fn schedule_morning_peak_alert(&self, at: DateTime<Utc>, uv_index: f64);
}

/// Route an alert to the matching notifier call
pub fn deliver(notifier: &dyn Notifier, alert: &Alert) {
    match alert {
        Alert::Warning { ratio } => notifier.send_warning(*ratio),
        Alert::Danger { ratio } => notifier.send_danger(*ratio),
        Alert::VitaminDTargetReached => notifier.send_vitamin_d_target_reached(),
        Alert::MorningPeak { at, uv_index } => notifier.schedule_morning_peak_alert(*at, *uv_index),
    }
}

/// Writes alerts to the log
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_warning(&self, ratio: f64) {
        tracing::warn!("UV warning: {:.0}% of burn threshold", ratio * 100.0);
    }

    fn send_danger(&self, ratio: f64) {
        tracing::error!("UV danger: {:.0}% of burn threshold, seek shade", ratio * 100.0);
    }

    fn send_vitamin_d_target_reached(&self) {
        tracing::info!("Daily vitamin D target reached");
    }

    fn schedule_morning_peak_alert(&self, at: DateTime<Utc>, uv_index: f64) {
        tracing::info!("Morning alert scheduled for {} (peak UV {:.1})", at, uv_index);
    }
}

/// Keeps every delivered alert in memory
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn push(&self, alert: Alert) {
        match self.alerts.lock() {
            Ok(mut alerts) => alerts.push(alert),
            Err(poisoned) => poisoned.into_inner().push(alert),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn send_warning(&self, ratio: f64) {
        self.push(Alert::Warning { ratio });
    }

    fn send_danger(&self, ratio: f64) {
        self.push(Alert::Danger { ratio });
    }

    fn send_vitamin_d_target_reached(&self) {
        self.push(Alert::VitaminDTargetReached);
    }

    fn schedule_morning_peak_alert(&self, at: DateTime<Utc>, uv_index: f64) {
        self.push(Alert::MorningPeak { at, uv_index });
    }
}

/// Cooldown bookkeeping for exposure and vitamin-D alerts
#[derive(Clone, Debug)]
pub struct NotificationGate {
    config: NotificationConfig,
    last_warning_at: Option<DateTime<Utc>>,
    last_danger_at: Option<DateTime<Utc>>,
    target_reached_on: Option<NaiveDate>,
}

impl NotificationGate {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            config,
            last_warning_at: None,
            last_danger_at: None,
            target_reached_on: None,
        }
    }

    /// Alerts due now. Records them as fired.
    pub fn evaluate(
        &mut self,
        exposure_ratio: f64,
        vitamin_d: Option<(f64, f64)>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if exposure_ratio >= self.config.danger_threshold {
            // Danger has its own shorter cooldown; a recent warning never silences it.
            if cooled_down(self.last_danger_at, now, self.config.danger_cooldown_secs) {
                self.last_danger_at = Some(now);
                alerts.push(Alert::Danger {
                    ratio: exposure_ratio,
                });
            }
        } else if exposure_ratio >= self.config.warning_threshold
            && cooled_down(self.last_warning_at, now, self.config.warning_cooldown_secs)
        {
            self.last_warning_at = Some(now);
            alerts.push(Alert::Warning {
                ratio: exposure_ratio,
            });
        }

        if let Some((total, target)) = vitamin_d {
            if target > 0.0 && total >= target && self.target_reached_on != Some(today) {
                self.target_reached_on = Some(today);
                alerts.push(Alert::VitaminDTargetReached);
            }
        }

        alerts
    }

    /// Forget all cooldowns and the per-day target flag
    pub fn reset(&mut self) {
        self.last_warning_at = None;
        self.last_danger_at = None;
        self.target_reached_on = None;
    }
}

fn cooled_down(last: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown_secs: i64) -> bool {
    match last {
        Some(last) => now - last >= Duration::seconds(cooldown_secs),
        None => true,
    }
}
