//! Utility classification
//!
//! Wastewater comes from a septic scan of the permit table; water and
//! power come from the service-provider narrative. The state well
//! registry is consulted only when the narrative leaves water
//! unresolved; its search is keyed by site address, so this provider
//! declares the address and runs after the record extraction supplies
//! it. Partial source failures degrade the result instead of
//! discarding it.

use super::permits::PermitRow;
use crate::types::{
    ContextKey, FieldValue, Provider, ProviderError, ProviderResult, ProviderStatus, RunContext,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

const PROVIDER_ID: &str = "utilities";

#[derive(Debug, Deserialize)]
struct ServiceProviderResponse {
    #[serde(default)]
    providers: Vec<ServiceProviderEntry>,
}

/// One row of the service-provider narrative.
#[derive(Debug, Deserialize)]
struct ServiceProviderEntry {
    category: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WellSearchResponse {
    #[serde(default)]
    count: u32,
}

/// Wastewater classification from the permit table, if any permit
/// mentions septic.
pub fn wastewater_from_permits(permits: &[PermitRow]) -> Option<String> {
    permits
        .iter()
        .find(|p| p.permit_type.to_ascii_lowercase().contains("septic"))
        .map(|p| format!("septic ({})", p.status.to_ascii_lowercase()))
}

pub struct UtilityProvider {
    client: reqwest::Client,
    base_url: String,
    well_registry_url: String,
}

impl UtilityProvider {
    pub fn new(client: reqwest::Client, base_url: String, well_registry_url: String) -> Self {
        Self {
            client,
            base_url,
            well_registry_url,
        }
    }

    async fn fetch_permits(&self, id: &str) -> Result<(Vec<PermitRow>, String), ProviderError> {
        let url = format!("{}/API/Permits/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(
                response.status(),
                "permit service",
            ));
        }
        let rows = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        Ok((rows, url))
    }

    async fn fetch_service_providers(
        &self,
        id: &str,
    ) -> Result<(Vec<ServiceProviderEntry>, String), ProviderError> {
        let url = format!("{}/API/ServiceProviders/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(
                response.status(),
                "service provider listing",
            ));
        }
        let parsed: ServiceProviderResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        Ok((parsed.providers, url))
    }

    async fn well_exists(&self, address: &str) -> Result<(bool, String), ProviderError> {
        let response = self
            .client
            .get(&self.well_registry_url)
            .query(&[("address", address)])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(
                response.status(),
                "well registry",
            ));
        }
        let source = response.url().to_string();
        let parsed: WellSearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        Ok((parsed.count > 0, source))
    }
}

#[async_trait]
impl Provider for UtilityProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::PropertyId, ContextKey::SiteAddress]
    }

    fn supplies(&self) -> &'static [ContextKey] {
        &[]
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult {
        let Some(id) = ctx.get_str(ContextKey::PropertyId) else {
            return ProviderResult::failure(
                self.id(),
                ProviderError::ExtractionFailure("no property id in context".to_string()),
            );
        };
        let id = id.to_string();

        let mut fields: Vec<FieldValue> = Vec::new();
        let mut first_error: Option<ProviderError> = None;

        // Wastewater: septic scan over the permit table
        match self.fetch_permits(&id).await {
            Ok((permits, source)) => match wastewater_from_permits(&permits) {
                Some(wastewater) => fields.push(FieldValue::text(
                    PROVIDER_ID,
                    "wastewater_type",
                    wastewater,
                    &source,
                )),
                None => fields.push(FieldValue::absent(PROVIDER_ID, "wastewater_type", &source)),
            },
            Err(e) => {
                warn!(property_id = %id, "Permit scan failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        // Water and power: service-provider narrative
        let mut water_resolved = false;
        match self.fetch_service_providers(&id).await {
            Ok((providers, source)) => {
                for entry in providers {
                    match entry.category.to_ascii_lowercase().as_str() {
                        "water" => {
                            fields.push(FieldValue::text(
                                PROVIDER_ID,
                                "water_type",
                                entry.name,
                                &source,
                            ));
                            water_resolved = true;
                        }
                        "power" => fields.push(FieldValue::text(
                            PROVIDER_ID,
                            "power_type",
                            entry.name,
                            &source,
                        )),
                        _ => {}
                    }
                }
            }
            Err(e) => {
                warn!(property_id = %id, "Service provider listing failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        // Well registry only when the narrative left water unresolved
        if !water_resolved {
            if let Some(address) = ctx.get_str(ContextKey::SiteAddress) {
                match self.well_exists(address).await {
                    Ok((true, source)) => {
                        debug!(property_id = %id, "Well registry resolved water");
                        fields.push(FieldValue::text(PROVIDER_ID, "water_type", "well", &source));
                    }
                    Ok((false, source)) => {
                        fields.push(FieldValue::absent(PROVIDER_ID, "water_type", &source));
                    }
                    Err(e) => {
                        warn!(property_id = %id, "Well registry lookup failed: {}", e);
                        first_error.get_or_insert(e);
                    }
                }
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
