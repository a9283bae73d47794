//! Daily streak folding.
//!
//! Each calendar day is folded into the counters at most once. A missed
//! day breaks both streaks.

use crate::exposure::compute_exposure_ratio;
use crate::types::{Streaks, UvSession, VitaminDRecord};
use chrono::NaiveDate;

/// Whether one day met the streak thresholds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayOutcome {
    pub date: NaiveDate,
    pub uv_safe: bool,
    pub vitamin_d_met: bool,
}

impl DayOutcome {
    /// UV-safe when no session reached the danger ratio
    pub fn from_records(
        date: NaiveDate,
        sessions: &[UvSession],
        vitamin_d: Option<&VitaminDRecord>,
        user_med: u32,
        danger_threshold: f64,
    ) -> Self {
        let uv_safe = sessions
            .iter()
            .filter(|s| s.date == date)
            .all(|s| compute_exposure_ratio(s.session_sed, user_med) < danger_threshold);
        let vitamin_d_met = vitamin_d
            .filter(|r| r.date == date)
            .is_some_and(VitaminDRecord::target_met);

        Self {
            date,
            uv_safe,
            vitamin_d_met,
        }
    }
}

/// Fold `outcome` into `streaks`; returns false when that day was already counted
pub fn fold_day(streaks: &mut Streaks, outcome: &DayOutcome) -> bool {
    if let Some(last) = streaks.last_updated {
        if outcome.date <= last {
            return false;
        }
        if last.succ_opt() != Some(outcome.date) {
            tracing::info!("Streak gap since {}, resetting", last);
            streaks.uv_safe_streak = 0;
            streaks.vitamin_d_streak = 0;
        }
    }

    streaks.uv_safe_streak = if outcome.uv_safe {
        streaks.uv_safe_streak.saturating_add(1)
    } else {
        0
    };
    streaks.vitamin_d_streak = if outcome.vitamin_d_met {
        streaks.vitamin_d_streak.saturating_add(1)
    } else {
        0
    };
    streaks.last_updated = Some(outcome.date);
    true
}
