//! Low-precision solar position.
//!
//! Good to roughly a degree, which is plenty for a day/night decision and
//! for the elevation proxy used in vitamin-D synthesis.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Days between the Unix epoch and J2000.0 (2000-01-01 12:00 TT)
const UNIX_TO_J2000_DAYS: f64 = 10957.5;

/// Sun elevation above the horizon in degrees at `instant`
pub fn solar_elevation(latitude: f64, longitude: f64, instant: DateTime<Utc>) -> f64 {
    let n = instant.timestamp() as f64 / 86_400.0 - UNIX_TO_J2000_DAYS;

    let mean_longitude = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
    let mean_anomaly = (357.528 + 0.985_600_3 * n).rem_euclid(360.0).to_radians();
    let ecliptic_longitude = (mean_longitude
        + 1.915 * mean_anomaly.sin()
        + 0.020 * (2.0 * mean_anomaly).sin())
    .to_radians();
    let obliquity = (23.439 - 0.000_000_4 * n).to_radians();

    let declination = (obliquity.sin() * ecliptic_longitude.sin()).asin();
    let right_ascension = (obliquity.cos() * ecliptic_longitude.sin())
        .atan2(ecliptic_longitude.cos())
        .to_degrees();

    let gmst_hours = (18.697_374_558 + 24.065_709_824_419_08 * n).rem_euclid(24.0);
    let local_sidereal_deg = gmst_hours * 15.0 + longitude;
    let hour_angle = (local_sidereal_deg - right_ascension).to_radians();

    let lat = latitude.to_radians();
    let sin_elevation =
        lat.sin() * declination.sin() + lat.cos() * declination.cos() * hour_angle.cos();
    sin_elevation.clamp(-1.0, 1.0).asin().to_degrees()
}

/// Whether the sun is above `min_elevation_deg`
pub fn is_daytime(
    latitude: f64,
    longitude: f64,
    instant: DateTime<Utc>,
    min_elevation_deg: f64,
) -> bool {
    solar_elevation(latitude, longitude, instant) > min_elevation_deg
}

/// Solar declination in degrees for a calendar day
pub fn declination(date: NaiveDate) -> f64 {
    let day_of_year = date.ordinal() as f64;
    23.44 * (360.0 / 365.0 * (284.0 + day_of_year)).to_radians().sin()
}

/// Elevation of the sun at local solar noon
pub fn noon_elevation(latitude: f64, date: NaiveDate) -> f64 {
    90.0 - (latitude - declination(date)).abs()
}
