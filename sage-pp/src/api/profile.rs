//! Profile endpoint
//!
//! One request, one reconciled profile. The response always carries the
//! merged record plus the per-provider status report; only a request
//! that cannot name a property, or a taxlot that resolves to nothing,
//! gets an error status.

use crate::db::CATEGORY_TABLES;
use crate::error::ApiError;
use crate::pipeline::{PropertyRecord, RunError, RunOutcome};
use crate::types::Identifier;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    /// Canonical county property id
    pub property_id: Option<String>,
    /// Taxlot alias, resolved before the pipeline runs
    pub taxlot: Option<String>,
    /// Optional site address override, seeds the geocoder directly
    pub address: Option<String>,
}

/// POST /profile
pub async fn profile(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProfileRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identifier = match (request.property_id, request.taxlot) {
        (Some(id), None) => Identifier::Canonical(id),
        (None, Some(taxlot)) => Identifier::Taxlot(taxlot),
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "give either property_id or taxlot, not both".to_string(),
            ))
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "one of property_id or taxlot is required".to_string(),
            ))
        }
    };
    info!(identifier = identifier.as_str(), "Profile requested");

    let outcome = state
        .orchestrator
        .run(identifier, request.address)
        .await
        .map_err(|e| match e {
            RunError::Resolution(inner) => ApiError::ResolutionFailed(inner.to_string()),
        })?;

    response_body(&outcome)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Response shape: the record grouped by category table, then the
/// per-provider report and the overall flag.
fn response_body(outcome: &RunOutcome) -> Result<serde_json::Value, serde_json::Error> {
    let mut body = serde_json::Map::new();
    body.insert(
        "property_id".to_string(),
        serde_json::json!(outcome.record.property_id),
    );
    body.insert("record".to_string(), grouped_fields(&outcome.record)?);
    body.insert(
        "providers".to_string(),
        serde_json::to_value(&outcome.providers)?,
    );
    body.insert("overall".to_string(), serde_json::to_value(outcome.overall)?);
    if let Some(err) = &outcome.persistence_error {
        body.insert("persistence_error".to_string(), serde_json::to_value(err)?);
    }
    Ok(serde_json::Value::Object(body))
}

/// Group resolved fields under their category table names. Unresolved
/// fields stay absent; a category with nothing resolved is omitted.
fn grouped_fields(record: &PropertyRecord) -> Result<serde_json::Value, serde_json::Error> {
    let mut grouped = serde_json::Map::new();
    for table in CATEGORY_TABLES {
        let mut section = serde_json::Map::new();
        for column in table.columns {
            if let Some(field) = record.fields.get(*column) {
                section.insert((*column).to_string(), serde_json::to_value(field)?);
            }
        }
        if !section.is_empty() {
            grouped.insert(table.name.to_string(), serde_json::Value::Object(section));
        }
    }
    Ok(serde_json::Value::Object(grouped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ResolvedField;
    use crate::types::FieldValue;
    use std::collections::BTreeMap;

    #[test]
    fn fields_land_under_their_category() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "owner_name".to_string(),
            ResolvedField {
                resolved: FieldValue::text("records", "owner_name", "SMITH", "page"),
                rank: 0,
                candidates: vec![],
            },
        );
        fields.insert(
            "slope_percent".to_string(),
            ResolvedField {
                resolved: FieldValue::number("slope", "slope_percent", 12.5, "samples"),
                rank: 0,
                candidates: vec![],
            },
        );
        let record = PropertyRecord {
            property_id: "131214".to_string(),
            fields,
        };

        let grouped = grouped_fields(&record).unwrap();
        assert!(grouped["basic_info"]["owner_name"]["resolved"]["value"].is_string());
        assert!(grouped["geo_info"]["slope_percent"]["resolved"]["value"].is_number());
        assert!(grouped.get("utility_details").is_none());
    }
}

