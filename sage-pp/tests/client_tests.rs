//! Provider behavior against mocked external services.

use httpmock::prelude::*;
use sage_pp::providers::geocode::GeocodeProvider;
use sage_pp::providers::permits::PermitProvider;
use sage_pp::providers::records::RecordProvider;
use sage_pp::providers::resolver::TaxlotResolver;
use sage_pp::types::{
    ContextKey, Provider, ProviderError, ProviderStatus, RunContext, Scalar,
};

fn ctx_with(key: ContextKey, value: serde_json::Value) -> RunContext {
    let mut ctx = RunContext::new();
    ctx.insert_if_absent(key, value);
    ctx
}

fn property_ctx() -> RunContext {
    ctx_with(ContextKey::PropertyId, serde_json::json!("131214"))
}

fn field_value<'a>(
    result: &'a sage_pp::types::ProviderResult,
    name: &str,
) -> Option<&'a Scalar> {
    result
        .emitted
        .iter()
        .find(|f| f.name == name)
        .and_then(|f| f.value.as_ref())
}

#[tokio::test]
async fn resolver_follows_redirect_to_record_page() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/Search/Results")
                .query_param("searchterm", "201118B010000");
            then.status(302)
                .header("Location", server.url("/Real/Index/131214"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/Real/Index/131214");
            then.status(200).body("record page");
        })
        .await;

    let resolver = TaxlotResolver::new(reqwest::Client::new(), server.base_url());
    let result = resolver
        .execute(&ctx_with(
            ContextKey::TaxlotId,
            serde_json::json!("201118B010000"),
        ))
        .await;

    assert!(result.status.is_success());
    let (_, id) = result
        .context
        .iter()
        .find(|(k, _)| *k == ContextKey::PropertyId)
        .unwrap();
    assert_eq!(id.as_str(), Some("131214"));
}

#[tokio::test]
async fn resolver_fails_when_search_does_not_redirect() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/Search/Results");
            then.status(200).body("no matches");
        })
        .await;

    let resolver = TaxlotResolver::new(reqwest::Client::new(), server.base_url());
    let result = resolver
        .execute(&ctx_with(ContextKey::TaxlotId, serde_json::json!("nope")))
        .await;

    assert!(matches!(
        result.status,
        ProviderStatus::Failure {
            error: ProviderError::ResolutionFailure(_)
        }
    ));
}

#[tokio::test]
async fn record_provider_extracts_fields_and_supplies_context() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/API/Property/131214");
            then.status(200).json_body(serde_json::json!({
                "owner": "SMITH, JOHN",
                "situs_address": "123 MAIN ST",
                "map_and_taxlot": "201118B010000",
                "acreage": 4.7,
                "zoning": "EFU",
                "subdivision": "TALL PINES",
                "lot": "4"
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/API/DevelopmentSummary/131214");
            then.status(200).json_body(serde_json::json!({
                "entries": [
                    { "label": "Overlay", "value": "Wildlife Area Combining Zone" },
                    { "label": "Notation", "value": "UTILITY ESMT ALONG NORTH LINE" }
                ]
            }));
        })
        .await;

    let provider = RecordProvider::new(reqwest::Client::new(), server.base_url());
    let result = provider.execute(&property_ctx()).await;

    assert!(result.status.is_success());
    assert_eq!(
        field_value(&result, "owner_name"),
        Some(&Scalar::Text("SMITH, JOHN".to_string()))
    );
    assert_eq!(
        field_value(&result, "overlay"),
        Some(&Scalar::Text("Wildlife Area Combining Zone".to_string()))
    );
    assert_eq!(
        field_value(&result, "legal_description"),
        Some(&Scalar::Text("TALL PINES, Lot 4".to_string()))
    );
    let easements = result
        .emitted
        .iter()
        .find(|f| f.name == "easements")
        .unwrap();
    assert_eq!(
        easements.value,
        Some(Scalar::Text("UTILITY ESMT ALONG NORTH LINE".to_string()))
    );
    assert!(easements.source.contains("/API/DevelopmentSummary/131214"));
    // Context for downstream providers
    let keys: Vec<ContextKey> = result.context.iter().map(|(k, _)| *k).collect();
    assert!(keys.contains(&ContextKey::ParcelNumber));
    assert!(keys.contains(&ContextKey::SiteAddress));
    assert!(keys.contains(&ContextKey::Zoning));
}

#[tokio::test]
async fn record_provider_falls_back_to_summary_for_legal() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/API/Property/131214");
            then.status(200).json_body(serde_json::json!({
                "owner": "SMITH, JOHN"
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/API/DevelopmentSummary/131214");
            then.status(200).json_body(serde_json::json!({
                "entries": [{ "label": "Legal", "value": "T20 R11 S18 TL 100" }]
            }));
        })
        .await;

    let provider = RecordProvider::new(reqwest::Client::new(), server.base_url());
    let result = provider.execute(&property_ctx()).await;

    assert!(result.status.is_success());
    let legal = result
        .emitted
        .iter()
        .find(|f| f.name == "legal_description")
        .unwrap();
    assert_eq!(legal.value, Some(Scalar::Text("T20 R11 S18 TL 100".to_string())));
    assert!(legal.source.contains("/API/DevelopmentSummary/131214"));
}

#[tokio::test]
async fn record_provider_is_partial_when_summary_fallback_breaks() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/API/Property/131214");
            then.status(200).json_body(serde_json::json!({
                "owner": "SMITH, JOHN"
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/API/DevelopmentSummary/131214");
            then.status(500);
        })
        .await;

    let provider = RecordProvider::new(reqwest::Client::new(), server.base_url());
    let result = provider.execute(&property_ctx()).await;

    // Owner still extracted, status degraded
    assert!(matches!(
        result.status,
        ProviderStatus::PartialSuccess { .. }
    ));
    assert!(field_value(&result, "owner_name").is_some());
    // An unchecked summary must not produce a "no easements" claim
    assert!(!result.emitted.iter().any(|f| f.name == "easements"));
}

#[tokio::test]
async fn geocode_provider_unprojects_best_candidate() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/geocode");
            then.status(200).json_body(serde_json::json!({
                "candidates": [
                    { "location": { "x": 111319.49, "y": 0.0 }, "score": 80.0 },
                    { "location": { "x": 0.0, "y": 0.0 }, "score": 100.0 }
                ]
            }));
        })
        .await;

    let provider = GeocodeProvider::new(reqwest::Client::new(), server.url("/geocode"));
    let result = provider
        .execute(&ctx_with(
            ContextKey::SiteAddress,
            serde_json::json!("123 MAIN ST"),
        ))
        .await;

    assert!(result.status.is_success());
    // Highest-score candidate is the origin
    let (_, coord) = result
        .context
        .iter()
        .find(|(k, _)| *k == ContextKey::Coordinates)
        .unwrap();
    assert!(coord["lat"].as_f64().unwrap().abs() < 1e-9);
    assert!(coord["lon"].as_f64().unwrap().abs() < 1e-9);
}

#[tokio::test]
async fn permit_provider_confirms_structure_from_finaled_permit() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/API/Permits/131214");
            then.status(200).json_body(serde_json::json!([
                { "permit_type": "Septic", "status": "Finaled", "issued": "1994-06-01" },
                { "permit_type": "Building - Dwelling", "status": "Finaled", "issued": "1995-03-12" }
            ]));
        })
        .await;

    let provider = PermitProvider::new(reqwest::Client::new(), server.base_url());
    let result = provider.execute(&property_ctx()).await;

    assert!(result.status.is_success());
    assert_eq!(
        field_value(&result, "structure_status"),
        Some(&Scalar::Text("confirmed".to_string()))
    );
    assert_eq!(
        field_value(&result, "structures_present"),
        Some(&Scalar::Flag(true))
    );
}

#[tokio::test]
async fn upstream_5xx_maps_to_provider_unavailable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/API/Permits/131214");
            then.status(503);
        })
        .await;

    let provider = PermitProvider::new(reqwest::Client::new(), server.base_url());
    let result = provider.execute(&property_ctx()).await;

    assert!(matches!(
        result.status,
        ProviderStatus::Failure {
            error: ProviderError::ProviderUnavailable(_)
        }
    ));
}
