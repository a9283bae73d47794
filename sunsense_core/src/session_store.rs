//! Session store.
//!
//! Single source of truth for the active outdoor session and today's
//! vitamin-D record. In-memory state is authoritative; the backend is
//! written best-effort:
//! - session rows are full-replace upserts after every change
//! - vitamin-D totals are written at most once per sync interval, and
//!   always on session end and on background transition
//!
//! A crash can therefore lose at most one sync interval of vitamin-D data.

use crate::backend::Backend;
use crate::types::{local_date, Profile, SessionEndReason, UvSession, VitaminDRecord};
use crate::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub struct SessionStore {
    backend: Arc<dyn Backend>,
    offset: FixedOffset,
    sync_interval: Duration,
    active: Option<UvSession>,
    exposure_ratio: f64,
    /// Start of the span not yet credited to the active session
    exposure_clock: Option<DateTime<Utc>>,
    vitamin_d: Option<VitaminDRecord>,
    current_day: Option<NaiveDate>,
    vitamin_d_dirty: bool,
    last_vitamin_d_sync: Option<DateTime<Utc>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn Backend>, offset: FixedOffset, sync_interval: Duration) -> Self {
        Self {
            backend,
            offset,
            sync_interval,
            active: None,
            exposure_ratio: 0.0,
            exposure_clock: None,
            vitamin_d: None,
            current_day: None,
            vitamin_d_dirty: false,
            last_vitamin_d_sync: None,
        }
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        local_date(now, self.offset)
    }

    pub fn active_session(&self) -> Option<&UvSession> {
        self.active.as_ref()
    }

    pub fn has_active_session(&self) -> bool {
        self.active.is_some()
    }

    /// Exposure ratio of the active session (0 when none)
    pub fn exposure_ratio(&self) -> f64 {
        self.exposure_ratio
    }

    pub fn vitamin_d(&self) -> Option<&VitaminDRecord> {
        self.vitamin_d.as_ref()
    }

    /// Day the loaded vitamin-D record belongs to
    pub fn current_day(&self) -> Option<NaiveDate> {
        self.current_day
    }

    /// Close any session a previous process left open
    pub async fn recover(&mut self, user_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let dangling = self
            .backend
            .active_sessions(user_id)
            .await
            .map_err(to_transient)?;

        let mut closed = 0;
        for mut session in dangling {
            if self.active.as_ref().map(|a| a.id) == Some(session.id) {
                continue;
            }
            session.end_time = Some(now);
            match self.backend.upsert_session(&session).await {
                Ok(()) => closed += 1,
                Err(e) => tracing::warn!("Failed to close dangling session {}: {}", session.id, e),
            }
        }

        if closed > 0 {
            tracing::info!("Closed {} dangling session(s) for {}", closed, user_id);
        }
        Ok(closed)
    }

    /// Open a new session, ending any existing one first
    pub async fn start_session(&mut self, user_id: Option<&str>, now: DateTime<Utc>) -> Result<Uuid> {
        let user_id = user_id.ok_or(Error::NoActiveUser)?;

        if self.active.is_some() {
            tracing::warn!("start_session called with a session already active; ending it");
            self.end_session(SessionEndReason::Replaced, now).await;
        }

        let session = UvSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            date: self.today(now),
            start_time: now,
            end_time: None,
            session_sed: 0.0,
            sunscreen_applied: false,
            created_at: now,
        };

        if let Err(e) = self.backend.upsert_session(&session).await {
            tracing::warn!("Failed to persist new session {}: {}", session.id, e);
        }

        tracing::info!("Started UV session {}", session.id);
        let id = session.id;
        self.active = Some(session);
        self.exposure_ratio = 0.0;
        self.exposure_clock = Some(now);
        Ok(id)
    }

    /// Add a dose increment to the active session; returns the new ratio
    pub async fn record_exposure(&mut self, sed_increment: f64, user_med: u32) -> Option<f64> {
        let ratio = self.credit_exposure(sed_increment, user_med)?;
        self.persist_session().await;
        Some(ratio)
    }

    /// Apply a dose increment in memory only; [`SessionStore::persist`] writes it out
    pub fn credit_exposure(&mut self, sed_increment: f64, user_med: u32) -> Option<f64> {
        let Some(session) = self.active.as_mut() else {
            tracing::debug!("Exposure credit with no active session, ignoring");
            return None;
        };

        if sed_increment.is_finite() && sed_increment > 0.0 {
            session.session_sed += sed_increment;
        }
        self.exposure_ratio = crate::exposure::compute_exposure_ratio(session.session_sed, user_med);

        tracing::debug!(
            "Session {} at {:.4} SED (ratio {:.2})",
            session.id,
            session.session_sed,
            self.exposure_ratio
        );
        Some(self.exposure_ratio)
    }

    /// Write the active session, then vitamin D if the sync interval has passed.
    ///
    /// Both totals are already final in memory, so dropping this future
    /// part-way only delays the writes to a later call.
    pub async fn persist(&mut self, now: DateTime<Utc>) {
        self.persist_session().await;
        if self.vitamin_d_sync_due(now) {
            self.flush_vitamin_d(now).await;
        }
    }

    async fn persist_session(&self) {
        let Some(session) = &self.active else {
            return;
        };
        if let Err(e) = self.backend.upsert_session(session).await {
            tracing::warn!("Failed to persist session {}: {}", session.id, e);
        }
    }

    /// Close the active session and force-flush vitamin D
    pub async fn end_session(
        &mut self,
        reason: SessionEndReason,
        now: DateTime<Utc>,
    ) -> Option<UvSession> {
        let mut session = self.active.take()?;
        session.end_time = Some(now);
        session.sunscreen_applied = reason == SessionEndReason::Sunscreen;

        if let Err(e) = self.backend.upsert_session(&session).await {
            tracing::warn!("Failed to persist end of session {}: {}", session.id, e);
        }

        tracing::info!(
            "Ended UV session {} ({:?}) with {:.4} SED",
            session.id,
            reason,
            session.session_sed
        );

        self.exposure_ratio = 0.0;
        self.exposure_clock = None;
        self.flush_vitamin_d(now).await;
        Some(session)
    }

    /// Seconds since exposure was last credited, capped at `max`; advances the clock
    pub fn take_elapsed(&mut self, now: DateTime<Utc>, max: Duration) -> f64 {
        let Some(since) = self.exposure_clock.replace(now) else {
            return 0.0;
        };
        if self.active.is_none() || now <= since {
            return 0.0;
        }
        let elapsed = (now - since).min(max);
        elapsed.num_milliseconds() as f64 / 1000.0
    }

    /// Drop any uncredited span, e.g. after a pause
    pub fn restart_clock(&mut self, now: DateTime<Utc>) {
        if self.active.is_some() {
            self.exposure_clock = Some(now);
        }
    }

    /// Today's record, rolling over (and persisting the outgoing day) on date change
    pub async fn load_or_create_daily_vitamin_d(
        &mut self,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<VitaminDRecord> {
        let today = self.today(now);

        if let Some(record) = &self.vitamin_d {
            if self.current_day == Some(today) && record.user_id == profile.user_id {
                return Ok(record.clone());
            }
        }

        if self.vitamin_d.is_some() {
            tracing::info!("Calendar day changed, persisting outgoing vitamin D record");
            self.flush_vitamin_d(now).await;
        }

        let record = match self
            .backend
            .fetch_vitamin_d(&profile.user_id, today)
            .await
            .map_err(to_transient)?
        {
            Some(existing) => {
                tracing::debug!("Loaded vitamin D record for {}", today);
                self.vitamin_d_dirty = false;
                self.last_vitamin_d_sync = Some(now);
                existing
            }
            None => {
                let record = VitaminDRecord {
                    id: Uuid::new_v4(),
                    user_id: profile.user_id.clone(),
                    date: today,
                    total_iu: 0.0,
                    target_iu: profile.vitamin_d_target_iu,
                    body_exposure_factor: profile.body_exposure_factor,
                    created_at: now,
                    updated_at: now,
                };
                match self.backend.upsert_vitamin_d(&record).await {
                    Ok(()) => {
                        self.vitamin_d_dirty = false;
                        self.last_vitamin_d_sync = Some(now);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to persist new vitamin D record: {}", e);
                        self.vitamin_d_dirty = true;
                    }
                }
                tracing::info!("Created vitamin D record for {}", today);
                record
            }
        };

        self.current_day = Some(today);
        self.vitamin_d = Some(record.clone());
        Ok(record)
    }

    /// Add to today's total; writes through only when the sync interval has passed
    pub async fn record_vitamin_d(&mut self, increment: f64, now: DateTime<Utc>) -> Option<f64> {
        let total = self.credit_vitamin_d(increment, now)?;
        if self.vitamin_d_sync_due(now) {
            self.flush_vitamin_d(now).await;
        }
        Some(total)
    }

    /// Add to today's total in memory only
    pub fn credit_vitamin_d(&mut self, increment: f64, now: DateTime<Utc>) -> Option<f64> {
        let today = self.today(now);
        let record = self.vitamin_d.as_mut().filter(|r| r.date == today)?;

        if increment.is_finite() && increment > 0.0 {
            record.total_iu += increment;
            record.updated_at = now;
            self.vitamin_d_dirty = true;
        }
        Some(record.total_iu)
    }

    fn vitamin_d_sync_due(&self, now: DateTime<Utc>) -> bool {
        self.vitamin_d_dirty
            && self
                .last_vitamin_d_sync
                .map_or(true, |last| now - last >= self.sync_interval)
    }

    /// Write buffered vitamin-D progress regardless of the sync interval
    pub async fn flush_vitamin_d(&mut self, now: DateTime<Utc>) {
        if self.vitamin_d_dirty {
            self.sync_vitamin_d(now).await;
        }
    }

    async fn sync_vitamin_d(&mut self, now: DateTime<Utc>) {
        let Some(record) = &self.vitamin_d else {
            return;
        };
        match self.backend.upsert_vitamin_d(record).await {
            Ok(()) => {
                self.vitamin_d_dirty = false;
                self.last_vitamin_d_sync = Some(now);
                tracing::debug!("Synced vitamin D total {:.0} IU", record.total_iu);
            }
            Err(e) => {
                tracing::warn!("Vitamin D sync failed, keeping buffered total: {}", e);
            }
        }
    }
}

fn to_transient(e: Error) -> Error {
    match e {
        Error::TransientBackend(_) => e,
        other => Error::TransientBackend(other.to_string()),
    }
}
