//! UV index sources and the read-through cache in front of them.

use crate::solar::solar_elevation;
use crate::types::ForecastPoint;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Weather/UV collaborator; both reads are fallible and cacheable
#[async_trait]
pub trait UvIndexSource: Send + Sync {
    async fn current_uv_index(&self, latitude: f64, longitude: f64, at: DateTime<Utc>)
        -> Result<f64>;

    /// Hourly forecast for the UTC calendar day `date`
    async fn uv_forecast(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Result<Vec<ForecastPoint>>;
}

/// Constant UV index, useful for replays and tests
#[derive(Clone, Debug)]
pub struct FixedUvSource {
    pub uv_index: f64,
}

impl FixedUvSource {
    pub fn new(uv_index: f64) -> Self {
        Self { uv_index }
    }
}

#[async_trait]
impl UvIndexSource for FixedUvSource {
    async fn current_uv_index(&self, _latitude: f64, _longitude: f64, _at: DateTime<Utc>) -> Result<f64> {
        Ok(self.uv_index)
    }

    async fn uv_forecast(
        &self,
        _latitude: f64,
        _longitude: f64,
        date: NaiveDate,
    ) -> Result<Vec<ForecastPoint>> {
        Ok(hourly(date)
            .map(|time| ForecastPoint {
                time,
                uv_index: self.uv_index,
            })
            .collect())
    }
}

/// Cloudless-sky UV estimate from solar elevation alone.
///
/// UVI ≈ 12.5 · μ₀^2.42 where μ₀ is the cosine of the solar zenith angle.
#[derive(Clone, Debug)]
pub struct ClearSkyUvModel {
    /// Multiplier for cloud cover or altitude; 1.0 is clear sky at sea level
    pub attenuation: f64,
}

impl Default for ClearSkyUvModel {
    fn default() -> Self {
        Self { attenuation: 1.0 }
    }
}

impl ClearSkyUvModel {
    pub fn uv_at(&self, latitude: f64, longitude: f64, at: DateTime<Utc>) -> f64 {
        let elevation = solar_elevation(latitude, longitude, at);
        if elevation <= 0.0 {
            return 0.0;
        }
        let mu = elevation.to_radians().sin();
        12.5 * mu.powf(2.42) * self.attenuation.max(0.0)
    }
}

#[async_trait]
impl UvIndexSource for ClearSkyUvModel {
    async fn current_uv_index(&self, latitude: f64, longitude: f64, at: DateTime<Utc>) -> Result<f64> {
        Ok(self.uv_at(latitude, longitude, at))
    }

    async fn uv_forecast(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Result<Vec<ForecastPoint>> {
        Ok(hourly(date)
            .map(|time| ForecastPoint {
                time,
                uv_index: self.uv_at(latitude, longitude, time),
            })
            .collect())
    }
}

fn hourly(date: NaiveDate) -> impl Iterator<Item = DateTime<Utc>> {
    (0..24).filter_map(move |hour| date.and_hms_opt(hour, 0, 0).map(|t| t.and_utc()))
}

/// Highest point of a forecast
pub fn forecast_peak(points: &[ForecastPoint]) -> Option<&ForecastPoint> {
    points
        .iter()
        .filter(|p| p.uv_index.is_finite())
        .max_by(|a, b| a.uv_index.total_cmp(&b.uv_index))
}

/// Read-through cache with a TTL that falls back to the last value on failure
#[derive(Clone, Debug)]
pub struct UvCache {
    ttl: Duration,
    last: Option<(f64, DateTime<Utc>)>,
}

impl UvCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, last: None }
    }

    pub fn cached(&self) -> Option<f64> {
        self.last.map(|(uv, _)| uv)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        matches!(self.last, Some((_, fetched)) if now >= fetched && now - fetched < self.ttl)
    }

    /// Cached value when fresh; otherwise fetch, falling back to the stale value
    pub async fn get(
        &mut self,
        source: &dyn UvIndexSource,
        latitude: f64,
        longitude: f64,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        if self.is_fresh(now) {
            if let Some(uv) = self.cached() {
                return Ok(uv);
            }
        }

        match source.current_uv_index(latitude, longitude, now).await {
            Ok(uv) if uv.is_finite() && uv >= 0.0 => {
                tracing::debug!("Fetched UV index {:.2}", uv);
                self.last = Some((uv, now));
                Ok(uv)
            }
            Ok(uv) => {
                tracing::warn!("UV source returned unusable value {}", uv);
                self.cached().ok_or(Error::StaleCache)
            }
            Err(e) => match self.cached() {
                Some(uv) => {
                    tracing::warn!("UV fetch failed ({}), using cached {:.2}", e, uv);
                    Ok(uv)
                }
                None => {
                    tracing::warn!("UV fetch failed ({}) with nothing cached", e);
                    Err(Error::StaleCache)
                }
            },
        }
    }
}
