//! Geocoding
//!
//! Turns the site address into geographic coordinates. The upstream
//! geocoder answers in Web Mercator, so the winning candidate is
//! inverse-projected to latitude/longitude before anything downstream
//! (elevation sampling, imagery) consumes it.

use crate::types::{
    ContextKey, Coordinate, FieldValue, Provider, ProviderError, ProviderResult, RunContext,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const PROVIDER_ID: &str = "geocode";

/// Earth radius of the spherical Mercator projection, meters.
const MERCATOR_RADIUS: f64 = 6_378_137.0;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    candidates: Vec<GeocodeCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeocodeCandidate {
    location: ProjectedPoint,
    #[serde(default)]
    score: f64,
}

/// Web Mercator easting/northing in meters.
#[derive(Debug, Clone, Copy, Deserialize)]
struct ProjectedPoint {
    x: f64,
    y: f64,
}

/// Inverse spherical Mercator projection.
fn unproject(point: ProjectedPoint) -> Coordinate {
    let lon = (point.x / MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (point.y / MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    Coordinate { lat, lon }
}

pub struct GeocodeProvider {
    client: reqwest::Client,
    geocoder_url: String,
}

impl GeocodeProvider {
    pub fn new(client: reqwest::Client, geocoder_url: String) -> Self {
        Self {
            client,
            geocoder_url,
        }
    }

    async fn geocode(&self, address: &str) -> Result<(Coordinate, String), ProviderError> {
        let response = self
            .client
            .get(&self.geocoder_url)
            .query(&[("SingleLine", address), ("maxLocations", "5"), ("f", "json")])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(response.status(), "geocoder"));
        }
        let source = response.url().to_string();
        let parsed: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;

        let best = parsed
            .candidates
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or_else(|| {
                ProviderError::ExtractionFailure(format!(
                    "no geocode candidates for '{}'",
                    address
                ))
            })?;
        Ok((unproject(best.location), source))
    }
}

#[async_trait]
impl Provider for GeocodeProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::SiteAddress]
    }

    fn supplies(&self) -> &'static [ContextKey] {
        &[ContextKey::Coordinates]
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult {
        let Some(address) = ctx.get_str(ContextKey::SiteAddress) else {
            return ProviderResult::failure(
                self.id(),
                ProviderError::ExtractionFailure("no site address in context".to_string()),
            );
        };
        match self.geocode(address).await {
            Ok((coord, source)) => {
                debug!(lat = coord.lat, lon = coord.lon, "Geocoded site address");
                ProviderResult::success(self.id())
                    .with_field(FieldValue::text(
                        PROVIDER_ID,
                        "gps_coord",
                        format!("{:.6},{:.6}", coord.lat, coord.lon),
                        &source,
                    ))
                    .with_context(
                        ContextKey::Coordinates,
                        serde_json::json!({ "lat": coord.lat, "lon": coord.lon }),
                    )
            }
            Err(e) => ProviderResult::failure(self.id(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_unprojects_to_null_island() {
        let c = unproject(ProjectedPoint { x: 0.0, y: 0.0 });
        assert!(c.lat.abs() < 1e-9);
        assert!(c.lon.abs() < 1e-9);
    }

    #[test]
    fn known_point_unprojects_within_tolerance() {
        // Bend, OR: lon -121.3153, lat 44.0582
        let c = unproject(ProjectedPoint {
            x: -13504757.0,
            y: 5475240.0,
        });
        assert!((c.lon - (-121.3153)).abs() < 0.01, "lon = {}", c.lon);
        assert!((c.lat - 44.0582).abs() < 0.01, "lat = {}", c.lat);
    }
}
