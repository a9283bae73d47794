//! Exposure calculator.
//!
//! Pure conversions from UV index and exposure time into erythemal dose
//! (SED) and vitamin-D yield (IU), plus the UV-adaptive sampling interval.
//! Every per-call exposure time is capped at [`EXPOSURE_CEILING_SECS`];
//! longer spans go through [`exposure_slices`].

use crate::types::SkinType;
use chrono::{Duration, NaiveDate};

/// Longest exposure time a single call will credit
pub const EXPOSURE_CEILING_SECS: f64 = 60.0;

/// Erythemally weighted irradiance of one UV index unit, W/m²
const IRRADIANCE_PER_UV_INDEX: f64 = 0.025;

/// One SED in J/m²
const JOULES_PER_SED: f64 = 100.0;

/// IU per UV-index-minute for full-body exposure of the most efficient skin type
const BASE_IU_PER_UV_MINUTE: f64 = 150.0;

/// Below this noon elevation no synthesis is credited
const MIN_SYNTHESIS_ELEVATION_DEG: f64 = 20.0;

/// At or above this noon elevation synthesis is unattenuated
const FULL_SYNTHESIS_ELEVATION_DEG: f64 = 45.0;

pub const MIN_TRACKING_INTERVAL_SECS: i64 = 60;
pub const MAX_TRACKING_INTERVAL_SECS: i64 = 1800;

fn capped_seconds(exposure_seconds: f64) -> f64 {
    if exposure_seconds.is_finite() {
        exposure_seconds.clamp(0.0, EXPOSURE_CEILING_SECS)
    } else {
        0.0
    }
}

fn sanitized_uv(uv_index: f64) -> f64 {
    if uv_index.is_finite() {
        uv_index.max(0.0)
    } else {
        0.0
    }
}

/// Standard erythema doses for `exposure_seconds` at `uv_index`
pub fn compute_sed(uv_index: f64, exposure_seconds: f64) -> f64 {
    sanitized_uv(uv_index) * IRRADIANCE_PER_UV_INDEX * capped_seconds(exposure_seconds)
        / JOULES_PER_SED
}

/// Session dose relative to the user's MED (stored in hundredths of an SED).
///
/// Unclamped so callers can tell "just crossed" from "far past".
pub fn compute_exposure_ratio(session_sed: f64, user_med: u32) -> f64 {
    if user_med == 0 {
        return 0.0;
    }
    session_sed / (user_med as f64 / 100.0)
}

/// Synthesis attenuation from the sun's noon elevation at `latitude` on `date`
pub fn elevation_factor(latitude: f64, date: NaiveDate) -> f64 {
    let elevation = crate::solar::noon_elevation(latitude, date);
    ((elevation - MIN_SYNTHESIS_ELEVATION_DEG)
        / (FULL_SYNTHESIS_ELEVATION_DEG - MIN_SYNTHESIS_ELEVATION_DEG))
        .clamp(0.0, 1.0)
}

/// Vitamin-D yield in IU
pub fn compute_vitamin_d(
    uv_index: f64,
    exposure_seconds: f64,
    body_exposure_factor: f64,
    skin_type: SkinType,
    latitude: f64,
    date: NaiveDate,
) -> f64 {
    let body = if body_exposure_factor.is_finite() {
        body_exposure_factor.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let minutes = capped_seconds(exposure_seconds) / 60.0;

    sanitized_uv(uv_index)
        * minutes
        * BASE_IU_PER_UV_MINUTE
        * body
        * skin_type.synthesis_efficiency()
        * elevation_factor(latitude, date)
}

/// Sampling interval for the current UV level; stronger sun samples more often
pub fn tracking_interval(uv_index: f64) -> Duration {
    let uv = sanitized_uv(uv_index);
    let secs = if uv >= 8.0 {
        60
    } else if uv >= 6.0 {
        120
    } else if uv >= 3.0 {
        300
    } else if uv >= 1.0 {
        600
    } else {
        1800
    };
    Duration::seconds(secs.clamp(MIN_TRACKING_INTERVAL_SECS, MAX_TRACKING_INTERVAL_SECS))
}

/// Split a span into ceiling-sized pieces for the per-call cap
pub fn exposure_slices(total_seconds: f64) -> impl Iterator<Item = f64> {
    let total = if total_seconds.is_finite() {
        total_seconds.max(0.0)
    } else {
        0.0
    };
    let full = (total / EXPOSURE_CEILING_SECS).floor() as usize;
    let rest = total - full as f64 * EXPOSURE_CEILING_SECS;
    std::iter::repeat(EXPOSURE_CEILING_SECS)
        .take(full)
        .chain((rest > 0.0).then_some(rest))
}
