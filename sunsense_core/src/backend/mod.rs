//! Persistence collaborator.
//!
//! The remote data store is reached through [`Backend`]; every call is
//! fallible and keyed by user id plus calendar date. Session writes are
//! full-replace upserts so a retried write can never double count.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::types::{FeatureSettings, Profile, Streaks, UvSession, VitaminDRecord};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Result<Profile>;

    async fn fetch_settings(&self, user_id: &str) -> Result<FeatureSettings>;

    /// Insert or fully replace a session row
    async fn upsert_session(&self, session: &UvSession) -> Result<()>;

    /// Sessions with no end time for `user_id`
    async fn active_sessions(&self, user_id: &str) -> Result<Vec<UvSession>>;

    async fn sessions_for_date(&self, user_id: &str, date: NaiveDate) -> Result<Vec<UvSession>>;

    async fn fetch_vitamin_d(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<VitaminDRecord>>;

    /// Insert or replace the record for `(user_id, date)`
    async fn upsert_vitamin_d(&self, record: &VitaminDRecord) -> Result<()>;

    async fn fetch_streaks(&self, user_id: &str) -> Result<Option<Streaks>>;

    async fn upsert_streaks(&self, streaks: &Streaks) -> Result<()>;
}
