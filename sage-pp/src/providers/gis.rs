//! GIS cross-reference
//!
//! Queries the county taxlot feature layer by parcel number and emits
//! secondary candidates for owner, address, and acreage. The merge
//! policy ranks these below the record document, so they only ever fill
//! gaps the primary extraction left.

use crate::types::{
    ContextKey, FieldValue, Provider, ProviderError, ProviderResult, RunContext,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const PROVIDER_ID: &str = "gis";

#[derive(Debug, Deserialize)]
struct FeatureQueryResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    attributes: TaxlotAttributes,
}

/// Attribute set of the taxlot layer.
#[derive(Debug, Deserialize)]
struct TaxlotAttributes {
    #[serde(rename = "OWNER")]
    owner: Option<String>,
    #[serde(rename = "ADDRESS")]
    address: Option<String>,
    #[serde(rename = "ACRES")]
    acres: Option<f64>,
    #[serde(rename = "ZONE")]
    zone: Option<String>,
}

pub struct GisProvider {
    client: reqwest::Client,
    base_url: String,
}

impl GisProvider {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    async fn query_taxlot(
        &self,
        parcel: &str,
    ) -> Result<(Option<TaxlotAttributes>, String), ProviderError> {
        let url = format!("{}/0/query", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("where", format!("TAXLOT = '{}'", parcel).as_str()),
                ("outFields", "OWNER,ADDRESS,ACRES,ZONE"),
                ("returnGeometry", "false"),
                ("f", "json"),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(response.status(), "GIS layer"));
        }
        let source = response.url().to_string();
        let parsed: FeatureQueryResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        Ok((parsed.features.into_iter().next().map(|f| f.attributes), source))
    }
}

#[async_trait]
impl Provider for GisProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::ParcelNumber]
    }

    fn supplies(&self) -> &'static [ContextKey] {
        &[]
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult {
        let Some(parcel) = ctx.get_str(ContextKey::ParcelNumber) else {
            return ProviderResult::failure(
                self.id(),
                ProviderError::ExtractionFailure("no parcel number in context".to_string()),
            );
        };

        let (attributes, source) = match self.query_taxlot(parcel).await {
            Ok(ok) => ok,
            Err(e) => return ProviderResult::failure(self.id(), e),
        };
        let Some(attrs) = attributes else {
            // Not every parcel is in the layer; nothing to cross-reference
            debug!(parcel = %parcel, "No GIS feature for parcel");
            return ProviderResult::success(self.id());
        };

        let mut fields = Vec::new();
        if let Some(owner) = attrs.owner.as_deref().filter(|s| !s.is_empty()) {
            fields.push(FieldValue::text(PROVIDER_ID, "owner_name", owner, &source));
        }
        if let Some(address) = attrs.address.as_deref().filter(|s| !s.is_empty()) {
            fields.push(FieldValue::text(PROVIDER_ID, "site_address", address, &source));
        }
        if let Some(acres) = attrs.acres {
            fields.push(FieldValue::number(PROVIDER_ID, "acreage", acres, &source));
        }
        if let Some(zone) = attrs.zone.as_deref().filter(|s| !s.is_empty()) {
            fields.push(FieldValue::text(PROVIDER_ID, "zoning", zone, &source));
        }
        ProviderResult::success(self.id()).with_fields(fields)
    }
}
