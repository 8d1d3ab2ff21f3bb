//! Built-in providers
//!
//! Each provider wraps one external service boundary: it fetches,
//! parses, and converts everything that can go wrong into a classified
//! status. No provider panics or raises across the scheduler boundary.

pub mod design;
pub mod geocode;
pub mod gis;
pub mod imagery;
pub mod permits;
pub mod planning;
pub mod power;
pub mod records;
pub mod resolver;
pub mod slope;
pub mod utilities;

use crate::types::Provider;
use sage_common::Settings;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = "SagePP/0.1.0 (property profile service)";

/// Shared HTTP client for all providers within a service instance.
pub fn build_http_client(settings: &Settings) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(settings.provider_timeout_secs))
        .build()
}

/// The taxlot alias resolver, run as an orchestrator pre-step.
pub fn resolver_provider(settings: &Settings, client: reqwest::Client) -> Arc<dyn Provider> {
    Arc::new(resolver::TaxlotResolver::new(
        client,
        settings.record_base_url.clone(),
    ))
}

/// The full production provider set, in no particular order (the
/// scheduler orders execution from the declared dependencies).
pub fn standard_providers(
    settings: &Settings,
    client: reqwest::Client,
) -> Vec<Arc<dyn Provider>> {
    vec![
        Arc::new(records::RecordProvider::new(
            client.clone(),
            settings.record_base_url.clone(),
        )),
        Arc::new(gis::GisProvider::new(
            client.clone(),
            settings.gis_base_url.clone(),
        )),
        Arc::new(geocode::GeocodeProvider::new(
            client.clone(),
            settings.geocoder_url.clone(),
        )),
        Arc::new(slope::SlopeProvider::new(
            client.clone(),
            settings.elevation_url.clone(),
            settings.maps_api_key.clone(),
        )),
        Arc::new(imagery::ImageryProvider::new(
            client.clone(),
            settings.imagery_url.clone(),
            settings.maps_api_key.clone(),
        )),
        Arc::new(permits::PermitProvider::new(
            client.clone(),
            settings.record_base_url.clone(),
        )),
        Arc::new(design::DesignProvider::new(
            client.clone(),
            settings.gis_base_url.clone(),
            settings.doc_parser_url.clone(),
            settings.design_standards_url.clone(),
        )),
        Arc::new(planning::PlanningProvider::new(
            client.clone(),
            settings.llm_endpoint.clone(),
            settings.llm_api_key.clone(),
            settings.llm_text_model.clone(),
        )),
        Arc::new(power::PowerProvider::new(
            client.clone(),
            power::PowerConfig {
                street_imagery_url: settings.street_imagery_url.clone(),
                maps_api_key: settings.maps_api_key.clone(),
                llm_endpoint: settings.llm_endpoint.clone(),
                llm_api_key: settings.llm_api_key.clone(),
                llm_model: settings.llm_vision_model.clone(),
            },
        )),
        Arc::new(utilities::UtilityProvider::new(
            client,
            settings.record_base_url.clone(),
            settings.well_registry_url.clone(),
        )),
    ]
}
