//! The tracking orchestrator.
//!
//! Owns every piece of mutable tracking state: the lock, the signal
//! history, the sampling timer and the session store. Exposure accrues
//! only while the outdoor lock is held, sunscreen is inactive and the sun
//! is up; [`Orchestrator::reconcile`] keeps the open session in line with
//! that rule after every change.
//!
//! Time is always passed in. Nothing here reads the wall clock, so the
//! whole machine runs the same under replay, tests and the live service.

use super::lock::{ActiveLock, Lock, SignalHistory};
use super::policy::{self, Decision, PolicyInput};
use super::state::{SamplingStatus, TrackingEvent, TrackingSnapshot, TrackingState};
use crate::backend::Backend;
use crate::config::Config;
use crate::exposure::{compute_sed, compute_vitamin_d, exposure_slices, tracking_interval};
use crate::notification::{deliver, Alert, NotificationGate, Notifier};
use crate::session_store::SessionStore;
use crate::solar;
use crate::streaks::{fold_day, DayOutcome};
use crate::sunscreen::SunscreenState;
use crate::types::{
    FeatureSettings, ForecastPoint, LocationMode, LocationObservation, Profile, SessionEndReason, Streaks,
    VitaminDRecord,
};
use crate::weather::{forecast_peak, UvCache, UvIndexSource};
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Interval used before any UV reading is available
const INITIAL_INTERVAL_SECS: i64 = 300;

const EVENT_CAPACITY: usize = 64;

/// External services the orchestrator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn Backend>,
    pub uv_source: Arc<dyn UvIndexSource>,
    pub notifier: Arc<dyn Notifier>,
}

/// Outcome of one daily maintenance run
#[derive(Clone, Debug, Serialize)]
pub struct MaintenanceReport {
    pub date: NaiveDate,
    pub closed_session: Option<Uuid>,
    pub vitamin_d: Option<VitaminDRecord>,
    pub streaks: Option<Streaks>,
    pub morning_alert: Option<Alert>,
}

pub struct Orchestrator {
    config: Config,
    user_id: Option<String>,
    backend: Arc<dyn Backend>,
    uv_source: Arc<dyn UvIndexSource>,
    notifier: Arc<dyn Notifier>,
    store: SessionStore,
    gate: NotificationGate,
    uv_cache: UvCache,
    sunscreen: SunscreenState,
    sunscreen_path: Option<PathBuf>,
    settings: FeatureSettings,

    lock: ActiveLock,
    signals: SignalHistory,
    manual_override: bool,
    last_mode: Option<LocationMode>,
    last_observation_at: Option<DateTime<Utc>>,
    position: Option<(f64, f64)>,
    state: TrackingState,

    sampling: SamplingStatus,
    interval: Duration,
    last_tick_at: Option<DateTime<Utc>>,
    last_uv_index: Option<f64>,

    last_maintenance_day: Option<NaiveDate>,
    morning_alert_for: Option<NaiveDate>,
    events: broadcast::Sender<TrackingEvent>,
}

impl Orchestrator {
    pub fn new(config: Config, user_id: Option<String>, collaborators: Collaborators) -> Self {
        let store = SessionStore::new(
            collaborators.backend.clone(),
            config.data.utc_offset(),
            Duration::seconds(config.session.vitamin_d_sync_interval_secs),
        );
        let gate = NotificationGate::new(config.notifications.clone());
        let uv_cache = UvCache::new(Duration::seconds(config.exposure.uv_cache_ttl_secs));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            user_id,
            backend: collaborators.backend,
            uv_source: collaborators.uv_source,
            notifier: collaborators.notifier,
            store,
            gate,
            uv_cache,
            sunscreen: SunscreenState::default(),
            sunscreen_path: None,
            settings: FeatureSettings::default(),
            lock: ActiveLock::None,
            signals: SignalHistory::default(),
            manual_override: false,
            last_mode: None,
            last_observation_at: None,
            position: None,
            state: TrackingState::Inside,
            sampling: SamplingStatus::Stopped,
            interval: Duration::seconds(INITIAL_INTERVAL_SECS),
            last_tick_at: None,
            last_uv_index: None,
            last_maintenance_day: None,
            morning_alert_for: None,
            events,
        }
    }

    /// Load and persist the sunscreen timestamp at `path`
    pub fn with_sunscreen_file(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        self.sunscreen = SunscreenState::load(&path)?;
        self.sunscreen_path = Some(path);
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn set_user(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    pub fn outdoor_locked(&self) -> bool {
        self.lock.is_outdoor()
    }

    pub fn vehicle_locked(&self) -> bool {
        self.lock.is_vehicle()
    }

    pub fn sampling(&self) -> SamplingStatus {
        self.sampling
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    pub fn sunscreen_active(&self, now: DateTime<Utc>) -> bool {
        self.sunscreen.is_active(now, self.protection())
    }

    /// Last known position, used for daytime checks and forecasts
    pub fn set_position(&mut self, latitude: f64, longitude: f64) {
        self.position = Some((latitude, longitude));
    }

    pub fn state(&self, now: DateTime<Utc>) -> TrackingState {
        self.derive_state(now)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> TrackingSnapshot {
        TrackingSnapshot {
            state: self.derive_state(now),
            outdoor_locked: self.lock.is_outdoor(),
            vehicle_locked: self.lock.is_vehicle(),
            sampling: self.sampling,
            interval_secs: self.interval.num_seconds(),
            next_tick_due: self.next_tick_due(now),
            session: self.store.active_session().cloned(),
            exposure_ratio: self.store.exposure_ratio(),
            vitamin_d: self.store.vitamin_d().cloned(),
            sunscreen_active: self.sunscreen_active(now),
            manual_override: self.manual_override,
            taken_at: now,
        }
    }

    /// When the next tick should run, if anything is waiting on one
    pub fn next_tick_due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.sampling {
            SamplingStatus::Running => Some(self.last_tick_at.unwrap_or(now) + self.interval),
            // First instant past the debounce window
            SamplingStatus::Paused => self.signals.unknown_since.map(|since| {
                since + Duration::seconds(self.config.tracking.unknown_debounce_secs + 1)
            }),
            SamplingStatus::Stopped if self.lock.is_outdoor() => {
                self.sunscreen.expires_at(now, self.protection())
            }
            SamplingStatus::Stopped => None,
        }
    }

    /// Whether daily maintenance has not yet run for the day containing `now`
    pub fn maintenance_due(&self, now: DateTime<Utc>) -> bool {
        self.last_maintenance_day != Some(self.store.today(now))
    }

    /// Close sessions a previous process left open
    pub async fn recover(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let user_id = self.user_id.clone().ok_or(Error::NoActiveUser)?;
        self.store.recover(&user_id, now).await
    }

    /// Feed one observation through the transition rules
    pub async fn handle_observation(&mut self, obs: LocationObservation) -> Result<TrackingState> {
        if let Err(e) = obs.validate() {
            tracing::warn!("Ignoring observation: {}", e);
            return Err(e);
        }
        if let Some(last) = self.last_observation_at {
            if obs.timestamp < last {
                tracing::warn!("Ignoring out-of-order observation at {}", obs.timestamp);
                return Err(Error::InvalidObservation(format!(
                    "timestamp {} precedes last observation {}",
                    obs.timestamp, last
                )));
            }
        }

        let at = obs.timestamp;
        let signals = self.signals.advanced(&obs, &self.config.tracking);
        let daytime = solar::is_daytime(
            obs.latitude,
            obs.longitude,
            at,
            self.config.tracking.min_daylight_elevation_deg,
        );
        let evaluation = policy::evaluate(&PolicyInput {
            observation: &obs,
            lock: &self.lock,
            signals: &signals,
            manual_override: self.manual_override,
            daytime,
            config: &self.config.tracking,
        });

        tracing::debug!(
            "{:?} @ {:.2} -> {:?}",
            obs.mode,
            obs.confidence,
            evaluation.decision
        );

        if evaluation.decision.is_discarded() {
            return Ok(self.state);
        }

        self.signals = signals;
        self.last_observation_at = Some(at);
        self.last_mode = Some(obs.mode);
        self.position = Some((obs.latitude, obs.longitude));

        if let Some(reason) = evaluation.vehicle_released {
            tracing::info!("Vehicle lock released ({:?})", reason);
            self.lock = ActiveLock::None;
            self.emit(TrackingEvent::VehicleLockReleased { reason, at });
        }

        self.apply(evaluation.decision, at).await;
        Ok(self.publish_state(at))
    }

    async fn apply(&mut self, decision: Decision, at: DateTime<Utc>) {
        match decision {
            Decision::ForceInside => {
                self.lock = ActiveLock::None;
                self.close(SessionEndReason::ManualOverride, at).await;
            }
            Decision::EnterVehicle => {
                if let ActiveLock::Vehicle(lock) = &mut self.lock {
                    lock.corroborate(at);
                } else {
                    tracing::info!("Vehicle detected, taking vehicle lock");
                    self.lock = ActiveLock::Vehicle(Lock::new(at));
                    self.emit(TrackingEvent::VehicleLockAcquired { at });
                }
                self.close(SessionEndReason::Vehicle, at).await;
            }
            Decision::Night => {
                if self.lock.is_outdoor() {
                    tracing::info!("Sun is down, releasing outdoor lock");
                    self.lock = ActiveLock::None;
                }
                self.close(SessionEndReason::Night, at).await;
            }
            Decision::ContinueOutdoor => {
                self.lock.corroborate(at);
                self.reconcile(at).await;
                if let Err(e) = self.accumulate(at).await {
                    tracing::warn!("Exposure tick skipped: {}", e);
                }
            }
            Decision::StartOutdoor => {
                tracing::info!("Cold start accepted, taking outdoor lock");
                self.lock = ActiveLock::Outdoor(Lock::new(at));
                self.emit(TrackingEvent::OutdoorLockAcquired { at });
                self.reconcile(at).await;
            }
            Decision::RejectColdStart(reason) => {
                tracing::info!("Cold start rejected: {:?}", reason);
                self.emit(TrackingEvent::ColdStartRejected { reason, at });
            }
            Decision::UnknownHold => {
                if self.sampling == SamplingStatus::Running {
                    // Credit the time up to the blip, then stop accruing
                    if let Err(e) = self.accumulate(at).await {
                        tracing::warn!("Exposure tick skipped: {}", e);
                    }
                    self.sampling = SamplingStatus::Paused;
                    tracing::debug!("Unknown reading, sampling paused");
                }
            }
            Decision::UnknownTimeout => {
                tracing::info!("Unknown mode outlasted debounce, releasing outdoor lock");
                self.lock = ActiveLock::None;
                self.close(SessionEndReason::UnknownTimeout, at).await;
            }
            Decision::ReleaseIndoor(signal) => {
                tracing::info!("Strong indoor signal ({:?}), releasing outdoor lock", signal);
                self.emit(TrackingEvent::IndoorSignal { signal, at });
                self.lock = ActiveLock::None;
                self.close(SessionEndReason::Indoor, at).await;
            }
            Decision::IgnoreWeakInside => {
                tracing::debug!("Weak inside reading ignored under outdoor lock");
                self.reconcile(at).await;
            }
            Decision::IgnoreVehicleSample
            | Decision::HoldVehicle
            | Decision::Unknown
            | Decision::ConfirmInside
            | Decision::IgnoreLowConfidenceInside => {}
        }
    }

    /// One sampling-timer firing (also the background entry point)
    pub async fn run_exposure_tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.lock.is_outdoor()
            && self.signals.unknown_since.is_some()
            && policy::unknown_hold(now, &self.signals, &self.config.tracking) == Decision::UnknownTimeout
        {
            tracing::info!("Unknown hold expired without an outside reading");
            self.lock = ActiveLock::None;
            self.close(SessionEndReason::UnknownTimeout, now).await;
            self.publish_state(now);
            return Ok(());
        }

        if self.lock.is_outdoor() && !self.is_daytime(now) {
            tracing::info!("Sun is down, releasing outdoor lock");
            self.lock = ActiveLock::None;
            self.close(SessionEndReason::Night, now).await;
            self.publish_state(now);
            return Ok(());
        }

        let rolled_over = self
            .store
            .active_session()
            .is_some_and(|s| s.date != self.store.today(now));
        if rolled_over {
            self.close(SessionEndReason::DayRollover, now).await;
        }

        self.reconcile(now).await;
        let result = self.accumulate(now).await;
        self.publish_state(now);

        if let Err(e) = &result {
            tracing::warn!("Exposure tick skipped: {}", e);
        }
        result
    }

    /// Streaks, vitamin-D rollover, stale sessions and the morning alert
    pub async fn run_daily_maintenance(&mut self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let user_id = self.user_id.clone().ok_or(Error::NoActiveUser)?;
        let today = self.store.today(now);
        let mut report = MaintenanceReport {
            date: today,
            closed_session: None,
            vitamin_d: None,
            streaks: None,
            morning_alert: None,
        };

        if let Some(stale) = self.store.active_session().filter(|s| s.date < today) {
            report.closed_session = Some(stale.id);
            self.close(SessionEndReason::Maintenance, now).await;
        }

        let profile = self.backend.fetch_profile(&user_id).await?;
        self.refresh_settings(&user_id).await;

        match self.store.load_or_create_daily_vitamin_d(&profile, now).await {
            Ok(record) => report.vitamin_d = Some(record),
            Err(e) => tracing::warn!("Vitamin D rollover skipped: {}", e),
        }

        if let Some(yesterday) = today.pred_opt() {
            report.streaks = self.fold_streaks(&user_id, &profile, yesterday).await;
        }

        if self.last_maintenance_day.is_some_and(|day| day != today) {
            tracing::info!("New day, resetting alert cooldowns");
            self.gate.reset();
        }
        self.last_maintenance_day = Some(today);

        report.morning_alert = self.schedule_morning_peak(today).await;

        self.reconcile(now).await;
        self.publish_state(now);
        Ok(report)
    }

    pub async fn apply_sunscreen(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.sunscreen.apply(now);
        tracing::info!("Sunscreen applied, accumulation suppressed until {}", now + self.protection());
        self.close(SessionEndReason::Sunscreen, now).await;
        self.publish_state(now);

        if let Some(path) = &self.sunscreen_path {
            self.sunscreen.save(path)?;
        }
        Ok(())
    }

    pub async fn clear_sunscreen(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.sunscreen.clear();
        self.reconcile(now).await;
        self.publish_state(now);

        if let Some(path) = &self.sunscreen_path {
            self.sunscreen.save(path)?;
        }
        Ok(())
    }

    /// "I'm under cover": forces inside until switched off
    pub async fn set_manual_override(&mut self, on: bool, now: DateTime<Utc>) -> TrackingState {
        self.manual_override = on;
        if on {
            tracing::info!("Manual override on");
            self.lock = ActiveLock::None;
            self.close(SessionEndReason::ManualOverride, now).await;
        } else {
            tracing::info!("Manual override off");
        }
        self.publish_state(now)
    }

    /// A definitive floor-level change reported by the sensor layer
    pub fn note_floor_change(&mut self, at: DateTime<Utc>) {
        tracing::debug!("Floor change at {}", at);
        self.signals.note_floor_change(at);
    }

    pub async fn enter_background(&mut self, now: DateTime<Utc>) {
        tracing::debug!("Entering background, flushing vitamin D");
        self.store.flush_vitamin_d(now).await;
    }

    pub async fn enter_foreground(&mut self, now: DateTime<Utc>) {
        tracing::debug!("Entering foreground, flushing vitamin D");
        self.store.flush_vitamin_d(now).await;
    }

    /// Open or close the session so it matches lock, sunscreen and daylight
    async fn reconcile(&mut self, now: DateTime<Utc>) {
        let daytime = self.is_daytime(now);
        let sunscreen = self.sunscreen_active(now);
        let should_track = self.lock.is_outdoor() && daytime && !sunscreen;

        match (should_track, self.store.has_active_session()) {
            (true, false) => self.open(now).await,
            (false, true) => {
                let reason = if !daytime {
                    SessionEndReason::Night
                } else if sunscreen {
                    SessionEndReason::Sunscreen
                } else {
                    SessionEndReason::Indoor
                };
                self.close(reason, now).await;
            }
            (true, true) => {
                if self.sampling == SamplingStatus::Paused && self.signals.unknown_since.is_none() {
                    tracing::debug!("Sampling resumed");
                    self.sampling = SamplingStatus::Running;
                    self.store.restart_clock(now);
                    self.last_tick_at = Some(now);
                }
            }
            (false, false) => {}
        }
    }

    async fn open(&mut self, now: DateTime<Utc>) {
        match self.store.start_session(self.user_id.as_deref(), now).await {
            Ok(session_id) => {
                self.emit(TrackingEvent::SessionStarted { session_id, at: now });
                self.sampling = SamplingStatus::Running;
                self.last_tick_at = Some(now);
                if let Some(uv) = self.current_uv(now).await {
                    self.adapt_interval(uv, now);
                }
            }
            Err(e) => tracing::warn!("Could not start session: {}", e),
        }
    }

    async fn close(&mut self, reason: SessionEndReason, now: DateTime<Utc>) {
        if let Some(session) = self.store.end_session(reason, now).await {
            self.emit(TrackingEvent::SessionEnded {
                session_id: session.id,
                reason,
                session_sed: session.session_sed,
                at: now,
            });
        }
        self.sampling = SamplingStatus::Stopped;
        self.last_tick_at = None;
    }

    /// Credit exposure since the last tick to the open session
    async fn accumulate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.sampling != SamplingStatus::Running || !self.store.has_active_session() {
            return Ok(());
        }
        let Some((latitude, longitude)) = self.position else {
            return Ok(());
        };

        // The next attempt is one interval out even if this one fails; the
        // exposure clock only moves once the reads below have succeeded
        self.last_tick_at = Some(now);

        let user_id = self.user_id.clone().ok_or(Error::NoActiveUser)?;
        let profile = self.backend.fetch_profile(&user_id).await?;
        self.refresh_settings(&user_id).await;
        let uv_index = self
            .uv_cache
            .get(self.uv_source.as_ref(), latitude, longitude, now)
            .await?;

        let suppressed = self.sunscreen_active(now);
        let track_vitamin_d = self.settings.vitamin_d_tracking && !suppressed;
        if track_vitamin_d {
            if let Err(e) = self.store.load_or_create_daily_vitamin_d(&profile, now).await {
                tracing::warn!("Vitamin D record unavailable: {}", e);
            }
        }

        // No await from here until both totals are updated in memory
        let cap = self.exposure_cap();
        let elapsed = self.store.take_elapsed(now, cap);
        let (sed, iu) = if suppressed {
            (0.0, 0.0)
        } else {
            self.dose(&profile, uv_index, elapsed, latitude, now)
        };
        let ratio = self
            .store
            .credit_exposure(sed, profile.effective_med())
            .unwrap_or(0.0);
        let vitamin_d = if track_vitamin_d {
            self.store.credit_vitamin_d(iu, now).and_then(|_| {
                self.store
                    .vitamin_d()
                    .map(|record| (record.total_iu, record.target_iu))
            })
        } else {
            None
        };

        if let Some(session) = self.store.active_session() {
            self.emit(TrackingEvent::ExposureUpdated {
                session_sed: session.session_sed,
                exposure_ratio: ratio,
                uv_index,
                at: now,
            });
        }
        if let Some((total_iu, target_iu)) = vitamin_d {
            self.emit(TrackingEvent::VitaminDUpdated {
                total_iu,
                target_iu,
                at: now,
            });
        }

        let today = self.store.today(now);
        for alert in self.gate.evaluate(ratio, vitamin_d, today, now) {
            if self.settings.notifications {
                deliver(self.notifier.as_ref(), &alert);
            }
            self.emit(TrackingEvent::Alert { alert, at: now });
        }

        self.adapt_interval(uv_index, now);
        self.last_uv_index = Some(uv_index);

        self.store.persist(now).await;
        Ok(())
    }

    /// Longest span one tick may credit
    fn exposure_cap(&self) -> Duration {
        let gap = self.interval * self.config.exposure.max_gap_intervals.max(1) as i32;
        gap.min(Duration::seconds(self.config.exposure.max_tick_secs))
    }

    fn dose(
        &self,
        profile: &Profile,
        uv_index: f64,
        elapsed_secs: f64,
        latitude: f64,
        now: DateTime<Utc>,
    ) -> (f64, f64) {
        let date = self.store.today(now);
        exposure_slices(elapsed_secs).fold((0.0, 0.0), |(sed, iu), secs| {
            (
                sed + compute_sed(uv_index, secs),
                iu + compute_vitamin_d(
                    uv_index,
                    secs,
                    profile.body_exposure_factor,
                    profile.skin_type,
                    latitude,
                    date,
                ),
            )
        })
    }

    async fn current_uv(&mut self, now: DateTime<Utc>) -> Option<f64> {
        let (latitude, longitude) = self.position?;
        match self
            .uv_cache
            .get(self.uv_source.as_ref(), latitude, longitude, now)
            .await
        {
            Ok(uv) => Some(uv),
            Err(e) => {
                tracing::warn!("No UV index for interval selection: {}", e);
                None
            }
        }
    }

    fn adapt_interval(&mut self, uv_index: f64, now: DateTime<Utc>) {
        let interval = tracking_interval(uv_index);
        if interval != self.interval {
            tracing::info!(
                "UV {:.1}: sampling every {}s (was {}s)",
                uv_index,
                interval.num_seconds(),
                self.interval.num_seconds()
            );
            self.interval = interval;
            self.emit(TrackingEvent::IntervalChanged {
                interval_secs: interval.num_seconds(),
                at: now,
            });
        }
    }

    async fn refresh_settings(&mut self, user_id: &str) {
        match self.backend.fetch_settings(user_id).await {
            Ok(settings) => self.settings = settings,
            Err(e) => tracing::warn!("Using last known feature settings: {}", e),
        }
    }

    async fn fold_streaks(&self, user_id: &str, profile: &Profile, day: NaiveDate) -> Option<Streaks> {
        let sessions = self
            .backend
            .sessions_for_date(user_id, day)
            .await
            .inspect_err(|e| tracing::warn!("Streak update skipped: {}", e))
            .ok()?;
        let record = self
            .backend
            .fetch_vitamin_d(user_id, day)
            .await
            .inspect_err(|e| tracing::warn!("Streak update skipped: {}", e))
            .ok()?;
        let mut streaks = self
            .backend
            .fetch_streaks(user_id)
            .await
            .inspect_err(|e| tracing::warn!("Streak update skipped: {}", e))
            .ok()?
            .unwrap_or_else(|| Streaks::new(user_id));

        let outcome = DayOutcome::from_records(
            day,
            &sessions,
            record.as_ref(),
            profile.effective_med(),
            self.config.notifications.danger_threshold,
        );
        if fold_day(&mut streaks, &outcome) {
            tracing::info!(
                "Streaks after {}: UV-safe {}, vitamin D {}",
                day,
                streaks.uv_safe_streak,
                streaks.vitamin_d_streak
            );
            if let Err(e) = self.backend.upsert_streaks(&streaks).await {
                tracing::warn!("Failed to persist streaks: {}", e);
            }
        }
        Some(streaks)
    }

    async fn schedule_morning_peak(&mut self, today: NaiveDate) -> Option<Alert> {
        if !(self.settings.morning_peak_alert && self.settings.notifications) {
            return None;
        }
        let tomorrow = today.succ_opt()?;
        if self.morning_alert_for == Some(tomorrow) {
            return None;
        }
        let (latitude, longitude) = self.position?;

        let forecast = self
            .local_day_forecast(latitude, longitude, tomorrow)
            .await
            .inspect_err(|e| tracing::warn!("Forecast unavailable: {}", e))
            .ok()?;
        let peak = forecast_peak(&forecast)?;
        if peak.uv_index < self.config.notifications.morning_peak_min_uv {
            tracing::debug!("Tomorrow peaks at UV {:.1}, no morning alert", peak.uv_index);
            return None;
        }

        let at = tomorrow
            .and_hms_opt(self.config.notifications.morning_alert_hour, 0, 0)?
            .and_local_timezone(self.config.data.utc_offset())
            .single()?
            .with_timezone(&Utc);
        let alert = Alert::MorningPeak {
            at,
            uv_index: peak.uv_index,
        };

        deliver(self.notifier.as_ref(), &alert);
        self.emit(TrackingEvent::Alert {
            alert: alert.clone(),
            at,
        });
        self.morning_alert_for = Some(tomorrow);
        Some(alert)
    }

    /// Forecast points inside the local calendar day `day`
    async fn local_day_forecast(
        &self,
        latitude: f64,
        longitude: f64,
        day: NaiveDate,
    ) -> Result<Vec<ForecastPoint>> {
        let start = day
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| midnight.and_local_timezone(self.config.data.utc_offset()).single())
            .map(|midnight| midnight.with_timezone(&Utc))
            .ok_or_else(|| Error::Other(format!("no local midnight on {}", day)))?;
        let end = start + Duration::days(1);

        // Sources answer per UTC day; a local day can straddle two of them
        let first = start.date_naive();
        let last = (end - Duration::seconds(1)).date_naive();
        let mut points = Vec::new();
        for date in first.iter_days().take_while(|d| *d <= last) {
            let forecast = self.uv_source.uv_forecast(latitude, longitude, date).await?;
            points.extend(
                forecast
                    .into_iter()
                    .filter(|p| p.time >= start && p.time < end),
            );
        }
        Ok(points)
    }

    fn is_daytime(&self, now: DateTime<Utc>) -> bool {
        self.position.is_some_and(|(latitude, longitude)| {
            solar::is_daytime(
                latitude,
                longitude,
                now,
                self.config.tracking.min_daylight_elevation_deg,
            )
        })
    }

    fn protection(&self) -> Duration {
        Duration::minutes(self.config.sunscreen.protection_minutes)
    }

    fn derive_state(&self, now: DateTime<Utc>) -> TrackingState {
        if self.manual_override {
            return TrackingState::Inside;
        }
        match self.lock {
            ActiveLock::Vehicle(_) => TrackingState::Vehicle,
            ActiveLock::Outdoor(_) if self.last_mode == Some(LocationMode::Outside) => {
                TrackingState::OutsideTracking
            }
            ActiveLock::Outdoor(_) => TrackingState::OutsideLockedElsewhere,
            ActiveLock::None => match (self.last_mode, self.signals.unknown_for(now)) {
                (Some(LocationMode::Unknown), Some(held))
                    if held <= Duration::seconds(self.config.tracking.unknown_debounce_secs) =>
                {
                    TrackingState::UnknownSettling
                }
                (Some(LocationMode::Unknown), _) => TrackingState::UnknownConfirmed,
                _ => TrackingState::Inside,
            },
        }
    }

    fn publish_state(&mut self, now: DateTime<Utc>) -> TrackingState {
        let next = self.derive_state(now);
        if next != self.state {
            tracing::info!("State {} -> {}", self.state, next);
            self.emit(TrackingEvent::StateChanged {
                from: self.state,
                to: next,
                at: now,
            });
            self.state = next;
        }
        next
    }

    fn emit(&self, event: TrackingEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
