//! Permit-based structure inference
//!
//! Reads the permit table for the canonical id and classifies structure
//! presence from administrative evidence: a finaled construction permit
//! confirms a structure, active construction or recent utility work
//! means one is going up, anything else is no evidence. A confirmed
//! classification outranks the imagery heuristic in the merge policy.

use crate::types::{
    ContextKey, FieldValue, Provider, ProviderError, ProviderResult, RunContext,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

const PROVIDER_ID: &str = "permits";

/// Utility work this recent implies construction in progress.
const UTILITY_RECENCY_DAYS: i64 = 365;

/// One row of the county permit table.
#[derive(Debug, Clone, Deserialize)]
pub struct PermitRow {
    /// Permit classification, e.g. "Building", "Electrical", "Septic"
    pub permit_type: String,
    /// Lifecycle status, e.g. "Finaled", "Active", "Expired"
    pub status: String,
    /// Issue date, YYYY-MM-DD
    pub issued: Option<NaiveDate>,
}

/// Structure evidence derived from the permit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureEvidence {
    /// A finaled construction permit exists
    Confirmed,
    /// Construction is active, or utility work happened within a year
    InProgress,
    /// The permit table says nothing about structures
    None,
}

impl StructureEvidence {
    fn as_str(self) -> &'static str {
        match self {
            StructureEvidence::Confirmed => "confirmed",
            StructureEvidence::InProgress => "in_progress",
            StructureEvidence::None => "none",
        }
    }
}

fn is_construction(row: &PermitRow) -> bool {
    let t = row.permit_type.to_ascii_lowercase();
    t.contains("building") || t.contains("dwelling") || t.contains("construction")
}

fn is_utility(row: &PermitRow) -> bool {
    let t = row.permit_type.to_ascii_lowercase();
    t.contains("electrical") || t.contains("plumbing") || t.contains("septic")
}

fn is_finaled(row: &PermitRow) -> bool {
    row.status.eq_ignore_ascii_case("finaled")
}

fn is_active(row: &PermitRow) -> bool {
    row.status.eq_ignore_ascii_case("active")
}

/// Classify structure evidence as of `today`.
pub fn classify(permits: &[PermitRow], today: NaiveDate) -> StructureEvidence {
    if permits.iter().any(|p| is_construction(p) && is_finaled(p)) {
        return StructureEvidence::Confirmed;
    }
    let recent_utility = permits.iter().any(|p| {
        is_utility(p)
            && p.issued
                .is_some_and(|d| (today - d).num_days() <= UTILITY_RECENCY_DAYS && d <= today)
    });
    if permits.iter().any(|p| is_construction(p) && is_active(p)) || recent_utility {
        return StructureEvidence::InProgress;
    }
    StructureEvidence::None
}

pub struct PermitProvider {
    client: reqwest::Client,
    base_url: String,
}

impl PermitProvider {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
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
        let rows: Vec<PermitRow> = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        Ok((rows, url))
    }
}

#[async_trait]
impl Provider for PermitProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::PropertyId]
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

        let (rows, source) = match self.fetch_permits(id).await {
            Ok(ok) => ok,
            Err(e) => return ProviderResult::failure(self.id(), e),
        };
        let evidence = classify(&rows, Utc::now().date_naive());
        debug!(property_id = %id, permits = rows.len(), evidence = evidence.as_str(), "Classified permit evidence");

        let mut result = ProviderResult::success(self.id()).with_field(FieldValue::text(
            PROVIDER_ID,
            "structure_status",
            evidence.as_str(),
            &source,
        ));
        // Only a confirmed structure is a positive claim; otherwise the
        // imagery heuristic keeps the say on structures_present.
        if evidence == StructureEvidence::Confirmed {
            result = result.with_field(FieldValue::flag(
                PROVIDER_ID,
                "structures_present",
                true,
                &source,
            ));
        }
        result
    }
}
