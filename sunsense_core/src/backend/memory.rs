//! In-process backend, used as a test fixture and for offline runs.

use super::Backend;
use crate::types::{FeatureSettings, Profile, Streaks, UvSession, VitaminDRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Tables {
    profiles: HashMap<String, Profile>,
    settings: HashMap<String, FeatureSettings>,
    sessions: Vec<UvSession>,
    vitamin_d: Vec<VitaminDRecord>,
    streaks: HashMap<String, Streaks>,
}

#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    reads: AtomicUsize,
    write_latency: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: Profile) -> Self {
        let backend = Self::new();
        backend.put_profile(profile);
        backend
    }

    pub fn put_profile(&self, profile: Profile) {
        self.lock().profiles.insert(profile.user_id.clone(), profile);
    }

    pub fn put_settings(&self, user_id: &str, settings: FeatureSettings) {
        self.lock().settings.insert(user_id.to_string(), settings);
    }

    /// Make every subsequent read fail with a transient error
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail with a transient error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Hold every subsequent write for `latency` before it lands
    pub fn set_write_latency(&self, latency: Option<Duration>) {
        *self
            .write_latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = latency;
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of read attempts so far, failed ones included
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<UvSession> {
        self.lock().sessions.clone()
    }

    pub fn vitamin_d_records(&self) -> Vec<VitaminDRecord> {
        self.lock().vitamin_d.clone()
    }

    pub fn streaks(&self, user_id: &str) -> Option<Streaks> {
        self.lock().streaks.get(user_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A poisoned lock only means a test panicked mid-write; the data is still usable.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_read(&self) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::TransientBackend("simulated read failure".into()));
        }
        Ok(())
    }

    async fn check_write(&self) -> Result<()> {
        let latency = *self
            .write_latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::TransientBackend("simulated write failure".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_profile(&self, user_id: &str) -> Result<Profile> {
        self.check_read()?;
        self.lock()
            .profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::TransientBackend(format!("no profile for {}", user_id)))
    }

    async fn fetch_settings(&self, user_id: &str) -> Result<FeatureSettings> {
        self.check_read()?;
        Ok(self.lock().settings.get(user_id).cloned().unwrap_or_default())
    }

    async fn upsert_session(&self, session: &UvSession) -> Result<()> {
        self.check_write().await?;
        let mut tables = self.lock();
        match tables.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => tables.sessions.push(session.clone()),
        }
        Ok(())
    }

    async fn active_sessions(&self, user_id: &str) -> Result<Vec<UvSession>> {
        self.check_read()?;
        Ok(self
            .lock()
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active())
            .cloned()
            .collect())
    }

    async fn sessions_for_date(&self, user_id: &str, date: NaiveDate) -> Result<Vec<UvSession>> {
        self.check_read()?;
        Ok(self
            .lock()
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.date == date)
            .cloned()
            .collect())
    }

    async fn fetch_vitamin_d(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<VitaminDRecord>> {
        self.check_read()?;
        Ok(self
            .lock()
            .vitamin_d
            .iter()
            .find(|r| r.user_id == user_id && r.date == date)
            .cloned())
    }

    async fn upsert_vitamin_d(&self, record: &VitaminDRecord) -> Result<()> {
        self.check_write().await?;
        let mut tables = self.lock();
        match tables
            .vitamin_d
            .iter_mut()
            .find(|r| r.user_id == record.user_id && r.date == record.date)
        {
            Some(existing) => *existing = record.clone(),
            None => tables.vitamin_d.push(record.clone()),
        }
        Ok(())
    }

    async fn fetch_streaks(&self, user_id: &str) -> Result<Option<Streaks>> {
        self.check_read()?;
        Ok(self.lock().streaks.get(user_id).cloned())
    }

    async fn upsert_streaks(&self, streaks: &Streaks) -> Result<()> {
        self.check_write().await?;
        self.lock()
            .streaks
            .insert(streaks.user_id.clone(), streaks.clone());
        Ok(())
    }
}
