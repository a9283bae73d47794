//! Sunscreen protection state.
//!
//! Persisted as a single application timestamp; protection is active for a
//! fixed window after it.

use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SunscreenState {
    pub applied_at: Option<DateTime<Utc>>,
}

impl SunscreenState {
    pub fn load(path: &Path) -> Result<Self> {
        crate::persist::load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::persist::save_json(path, self)
    }

    pub fn apply(&mut self, now: DateTime<Utc>) {
        self.applied_at = Some(now);
    }

    pub fn clear(&mut self) {
        self.applied_at = None;
    }

    pub fn is_active(&self, now: DateTime<Utc>, protection: Duration) -> bool {
        match self.applied_at {
            Some(applied) => now >= applied && now - applied < protection,
            None => false,
        }
    }

    /// When protection lapses, if it is currently active
    pub fn expires_at(&self, now: DateTime<Utc>, protection: Duration) -> Option<DateTime<Utc>> {
        self.applied_at
            .filter(|_| self.is_active(now, protection))
            .map(|applied| applied + protection)
    }
}
