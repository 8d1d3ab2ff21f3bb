//! Engineering design parameters
//!
//! Ground snow load comes from the GIS snow-load layer when the
//! coordinate falls inside it. Everything else (wind speeds, frost
//! depth, exposure, seismic category, and snow load as a fallback) is
//! extracted with fixed patterns from the text the document-parsing
//! service returns for the jurisdiction's design-standards document.
//! A pattern that does not match leaves its field unavailable.

use crate::types::{
    ContextKey, FieldValue, Provider, ProviderError, ProviderResult, ProviderStatus, RunContext,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

const PROVIDER_ID: &str = "design";

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    #[serde(default)]
    results: Vec<IdentifyResult>,
}

#[derive(Debug, Deserialize)]
struct IdentifyResult {
    attributes: SnowLoadAttributes,
}

#[derive(Debug, Deserialize)]
struct SnowLoadAttributes {
    #[serde(rename = "SNOW_LOAD")]
    snow_load: Option<f64>,
}

/// Text payload from the document-parsing service.
#[derive(Debug, Deserialize)]
struct ParsedDocument {
    text: String,
}

/// Numeric design parameters pulled from standards text.
#[derive(Debug, Default, PartialEq)]
pub struct StandardsParams {
    pub snow_load: Option<f64>,
    pub wind_speed_basic: Option<f64>,
    pub wind_speed_ultimate: Option<f64>,
    pub frost_depth: Option<f64>,
    pub exposure_category: Option<String>,
    pub seismic_category: Option<String>,
}

struct StandardsPatterns {
    snow_load: Regex,
    wind_basic: Regex,
    wind_ultimate: Regex,
    frost_depth: Regex,
    exposure: Regex,
    seismic: Regex,
}

impl StandardsPatterns {
    fn new() -> Self {
        let build = |p: &str| Regex::new(p).unwrap_or_else(|e| unreachable!("static regex: {e}"));
        Self {
            snow_load: build(r"(?i)snow\s+load[^0-9]{0,40}(\d+(?:\.\d+)?)\s*(?:psf|pounds)"),
            wind_basic: build(r"(?i)basic\s+wind\s+speed[^0-9]{0,40}(\d+(?:\.\d+)?)\s*mph"),
            wind_ultimate: build(
                r"(?i)ultimate\s+(?:design\s+)?wind\s+speed[^0-9]{0,40}(\d+(?:\.\d+)?)\s*mph",
            ),
            frost_depth: build(
                r"(?i)frost\s+(?:line\s+)?depth[^0-9]{0,40}(\d+(?:\.\d+)?)\s*(?:in|inch)",
            ),
            exposure: build(r"(?i)exposure\s+(?:category\s+)?([B-D])\b"),
            seismic: build(r"(?i)seismic\s+design\s+category\s+([A-F])\b"),
        }
    }

    fn number(&self, re: &Regex, text: &str) -> Option<f64> {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    fn letter(&self, re: &Regex, text: &str) -> Option<String> {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_uppercase())
    }

    /// Pull every recognized parameter out of the standards text.
    pub fn extract(&self, text: &str) -> StandardsParams {
        StandardsParams {
            snow_load: self.number(&self.snow_load, text),
            wind_speed_basic: self.number(&self.wind_basic, text),
            wind_speed_ultimate: self.number(&self.wind_ultimate, text),
            frost_depth: self.number(&self.frost_depth, text),
            exposure_category: self.letter(&self.exposure, text),
            seismic_category: self.letter(&self.seismic, text),
        }
    }
}

pub struct DesignProvider {
    client: reqwest::Client,
    gis_base_url: String,
    doc_parser_url: String,
    standards_url: String,
    patterns: StandardsPatterns,
}

impl DesignProvider {
    pub fn new(
        client: reqwest::Client,
        gis_base_url: String,
        doc_parser_url: String,
        standards_url: String,
    ) -> Self {
        Self {
            client,
            gis_base_url,
            doc_parser_url,
            standards_url,
            patterns: StandardsPatterns::new(),
        }
    }

    async fn identify_snow_load(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<(Option<f64>, String), ProviderError> {
        let url = format!("{}/identify", self.gis_base_url);
        let geometry = format!("{},{}", lon, lat);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("geometry", geometry.as_str()),
                ("geometryType", "esriGeometryPoint"),
                ("tolerance", "0"),
                ("returnGeometry", "false"),
                ("f", "json"),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(
                response.status(),
                "snow load layer",
            ));
        }
        let source = response.url().to_string();
        let parsed: IdentifyResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        let load = parsed
            .results
            .into_iter()
            .find_map(|r| r.attributes.snow_load);
        Ok((load, source))
    }

    async fn fetch_standards_text(&self) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(&self.doc_parser_url)
            .json(&serde_json::json!({ "url": self.standards_url }))
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(
                response.status(),
                "document parser",
            ));
        }
        let doc: ParsedDocument = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        Ok(doc.text)
    }
}

#[async_trait]
impl Provider for DesignProvider {
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

        let mut fields: Vec<FieldValue> = Vec::new();
        let mut first_error: Option<ProviderError> = None;

        let mut snow_resolved = false;
        match self.identify_snow_load(coord.lat, coord.lon).await {
            Ok((Some(load), source)) => {
                debug!(snow_load = load, "Snow load from GIS layer");
                fields.push(FieldValue::number(PROVIDER_ID, "snow_load", load, &source));
                snow_resolved = true;
            }
            Ok((None, _)) => {
                debug!("Coordinate outside snow load layer");
            }
            Err(e) => {
                warn!("Snow load layer unavailable: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match self.fetch_standards_text().await {
            Ok(text) => {
                let params = self.patterns.extract(&text);
                let source = &self.standards_url;
                if !snow_resolved {
                    if let Some(load) = params.snow_load {
                        fields.push(FieldValue::number(PROVIDER_ID, "snow_load", load, source));
                    }
                }
                if let Some(v) = params.wind_speed_basic {
                    fields.push(FieldValue::number(PROVIDER_ID, "wind_speed_basic", v, source));
                }
                if let Some(v) = params.wind_speed_ultimate {
                    fields.push(FieldValue::number(
                        PROVIDER_ID,
                        "wind_speed_ultimate",
                        v,
                        source,
                    ));
                }
                if let Some(v) = params.frost_depth {
                    fields.push(FieldValue::number(PROVIDER_ID, "frost_depth", v, source));
                }
                if let Some(v) = params.exposure_category {
                    fields.push(FieldValue::text(PROVIDER_ID, "exposure_category", v, source));
                }
                if let Some(v) = params.seismic_category {
                    fields.push(FieldValue::text(PROVIDER_ID, "seismic_category", v, source));
                }
            }
            Err(e) => {
                warn!("Design standards text unavailable: {}", e);
                first_error.get_or_insert(e);
            }
        }

        let mut result = ProviderResult::success(self.id()).with_fields(fields);
        match first_error {
            Some(error) if result.emitted.is_empty() => {
                result.status = ProviderStatus::Failure { error };
            }
            Some(error) => {
                result.status = ProviderStatus::PartialSuccess { error };
            }
            None => {}
        }
        result
    }
}
