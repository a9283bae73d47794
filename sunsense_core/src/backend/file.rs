//! Single-file JSON backend for local runs.
//!
//! The whole store lives in one document that is rewritten atomically on
//! every mutation, so a killed process leaves either the old or the new
//! state on disk.

use super::Backend;
use crate::persist::{load_json, update_json};
use crate::types::{FeatureSettings, Profile, Streaks, UvSession, VitaminDRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    current_user: Option<String>,
    #[serde(default)]
    profiles: HashMap<String, Profile>,
    #[serde(default)]
    settings: HashMap<String, FeatureSettings>,
    #[serde(default)]
    sessions: Vec<UvSession>,
    #[serde(default)]
    vitamin_d: Vec<VitaminDRecord>,
    #[serde(default)]
    streaks: HashMap<String, Streaks>,
}

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Document> {
        load_json(&self.path)
    }

    fn update<R>(&self, f: impl FnOnce(&mut Document) -> Result<R>) -> Result<R> {
        update_json(&self.path, f).map_err(|e| match e {
            Error::Io(io) => Error::TransientBackend(io.to_string()),
            other => other,
        })
    }

    /// The locally signed-in user, if any
    pub fn current_user(&self) -> Result<Option<String>> {
        Ok(self.load()?.current_user)
    }

    /// Store a profile and make its user the current one
    pub fn sign_in(&self, profile: Profile) -> Result<()> {
        self.update(|doc| {
            doc.current_user = Some(profile.user_id.clone());
            doc.profiles.insert(profile.user_id.clone(), profile);
            Ok(())
        })
    }

    pub fn put_settings(&self, user_id: &str, settings: FeatureSettings) -> Result<()> {
        self.update(|doc| {
            doc.settings.insert(user_id.to_string(), settings);
            Ok(())
        })
    }

    /// Every session for `user_id`, oldest first
    pub fn all_sessions(&self, user_id: &str) -> Result<Vec<UvSession>> {
        let mut sessions: Vec<_> = self
            .load()?
            .sessions
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(sessions)
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn fetch_profile(&self, user_id: &str) -> Result<Profile> {
        self.load()?
            .profiles
            .remove(user_id)
            .ok_or_else(|| Error::TransientBackend(format!("no profile for {}", user_id)))
    }

    async fn fetch_settings(&self, user_id: &str) -> Result<FeatureSettings> {
        Ok(self
            .load()?
            .settings
            .remove(user_id)
            .unwrap_or_default())
    }

    async fn upsert_session(&self, session: &UvSession) -> Result<()> {
        self.update(|doc| {
            match doc.sessions.iter_mut().find(|s| s.id == session.id) {
                Some(existing) => *existing = session.clone(),
                None => doc.sessions.push(session.clone()),
            }
            Ok(())
        })
    }

    async fn active_sessions(&self, user_id: &str) -> Result<Vec<UvSession>> {
        Ok(self
            .load()?
            .sessions
            .into_iter()
            .filter(|s| s.user_id == user_id && s.is_active())
            .collect())
    }

    async fn sessions_for_date(&self, user_id: &str, date: NaiveDate) -> Result<Vec<UvSession>> {
        Ok(self
            .load()?
            .sessions
            .into_iter()
            .filter(|s| s.user_id == user_id && s.date == date)
            .collect())
    }

    async fn fetch_vitamin_d(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<VitaminDRecord>> {
        Ok(self
            .load()?
            .vitamin_d
            .into_iter()
            .find(|r| r.user_id == user_id && r.date == date))
    }

    async fn upsert_vitamin_d(&self, record: &VitaminDRecord) -> Result<()> {
        self.update(|doc| {
            match doc
                .vitamin_d
                .iter_mut()
                .find(|r| r.user_id == record.user_id && r.date == record.date)
            {
                Some(existing) => *existing = record.clone(),
                None => doc.vitamin_d.push(record.clone()),
            }
            Ok(())
        })
    }

    async fn fetch_streaks(&self, user_id: &str) -> Result<Option<Streaks>> {
        Ok(self.load()?.streaks.remove(user_id))
    }

    async fn upsert_streaks(&self, streaks: &Streaks) -> Result<()> {
        self.update(|doc| {
            doc.streaks.insert(streaks.user_id.clone(), streaks.clone());
            Ok(())
        })
    }
}
