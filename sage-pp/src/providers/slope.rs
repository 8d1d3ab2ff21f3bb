//! Elevation and slope
//!
//! Samples elevation at the parcel coordinate and at a second point
//! offset five feet due north, then reports rise over run as a
//! percentage. A missing elevation sample makes the slope unavailable,
//! never zero.

use crate::types::{
    ContextKey, Coordinate, FieldValue, Provider, ProviderError, ProviderResult, RunContext,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const PROVIDER_ID: &str = "slope";

/// Horizontal run between the two samples, feet.
const RUN_FT: f64 = 5.0;
/// The same run in meters, used to offset the second sample north.
const RUN_M: f64 = 1.524;
/// Mean earth radius, meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;
const METERS_TO_FEET: f64 = 3.281;

#[derive(Debug, Deserialize)]
struct ElevationResponse {
    status: String,
    #[serde(default)]
    results: Vec<ElevationSample>,
}

#[derive(Debug, Deserialize)]
struct ElevationSample {
    elevation: Option<f64>,
}

/// Rise over run, as a percentage.
fn slope_percent(elevation_a_ft: f64, elevation_b_ft: f64, run_ft: f64) -> f64 {
    (elevation_b_ft - elevation_a_ft).abs() / run_ft * 100.0
}

/// Point `RUN_M` meters due north of `coord`.
fn offset_north(coord: Coordinate) -> Coordinate {
    Coordinate {
        lat: coord.lat + (RUN_M / EARTH_RADIUS_M).to_degrees(),
        lon: coord.lon,
    }
}

pub struct SlopeProvider {
    client: reqwest::Client,
    elevation_url: String,
    api_key: String,
}

impl SlopeProvider {
    pub fn new(client: reqwest::Client, elevation_url: String, api_key: String) -> Self {
        Self {
            client,
            elevation_url,
            api_key,
        }
    }

    /// Fetch both samples in one request; the service preserves order.
    async fn sample_pair(&self, a: Coordinate, b: Coordinate) -> Result<(f64, f64), ProviderError> {
        let locations = format!("{},{}|{},{}", a.lat, a.lon, b.lat, b.lon);
        let response = self
            .client
            .get(&self.elevation_url)
            .query(&[("locations", locations.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(
                response.status(),
                "elevation service",
            ));
        }
        let parsed: ElevationResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        if parsed.status != "OK" {
            return Err(ProviderError::ProviderUnavailable(format!(
                "elevation service status {}",
                parsed.status
            )));
        }

        match (
            parsed.results.first().and_then(|r| r.elevation),
            parsed.results.get(1).and_then(|r| r.elevation),
        ) {
            (Some(ea), Some(eb)) => Ok((ea * METERS_TO_FEET, eb * METERS_TO_FEET)),
            _ => Err(ProviderError::ExtractionFailure(
                "elevation sample missing from response".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Provider for SlopeProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Coordinates]
    }

    fn supplies(&self) -> &'static [ContextKey] {
        &[]
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult {
        let Some(coord) = ctx.coordinates() else {
            return ProviderResult::failure(
                self.id(),
                ProviderError::ExtractionFailure("no coordinates in context".to_string()),
            );
        };

        let north = offset_north(coord);
        match self.sample_pair(coord, north).await {
            Ok((elevation_a, elevation_b)) => {
                let slope = slope_percent(elevation_a, elevation_b, RUN_FT);
                debug!(elevation_ft = elevation_a, slope_percent = slope, "Sampled terrain");
                let source = format!(
                    "elevation samples at {:.6},{:.6}",
                    coord.lat, coord.lon
                );
                ProviderResult::success(self.id())
                    .with_field(FieldValue::number(
                        PROVIDER_ID,
                        "elevation_ft",
                        elevation_a,
                        &source,
                    ))
                    .with_field(FieldValue::number(
                        PROVIDER_ID,
                        "slope_percent",
                        slope,
                        &source,
                    ))
            }
            Err(e) => ProviderResult::failure(self.id(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_foot_rise_over_five_feet_is_hundred_percent() {
        assert_eq!(slope_percent(4000.0, 4005.0, 5.0), 100.0);
    }

    #[test]
    fn slope_is_symmetric_in_sample_order() {
        assert_eq!(
            slope_percent(4005.0, 4000.0, 5.0),
            slope_percent(4000.0, 4005.0, 5.0)
        );
    }

    #[test]
    fn north_offset_moves_latitude_only() {
        let origin = Coordinate {
            lat: 44.0,
            lon: -121.3,
        };
        let moved = offset_north(origin);
        assert_eq!(moved.lon, origin.lon);
        let delta = moved.lat - origin.lat;
        // 1.524 m of arc is roughly 1.37e-5 degrees
        assert!(delta > 1.3e-5 && delta < 1.45e-5, "delta = {}", delta);
    }
}
