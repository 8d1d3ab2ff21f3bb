//! Primary county record extraction
//!
//! Pulls the record document for a canonical id and turns it into the
//! administrative profile fields, then reads the development summary
//! for the rows the record page does not carry: easement passages, the
//! overlay row, and the legal-description fallback. The legal
//! description prefers the record document's own subdivision section;
//! provenance is kept per field so the two origins never blur together.

use crate::types::{
    ContextKey, FieldValue, Provider, ProviderError, ProviderResult, RunContext,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

const PROVIDER_ID: &str = "records";

/// Record document as served by the county API.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordDocument {
    /// Owner of record
    pub owner: Option<String>,
    /// Owner's mailing address
    pub mailing_address: Option<String>,
    /// Street address of the parcel
    pub situs_address: Option<String>,
    /// Combined map and taxlot number
    pub map_and_taxlot: Option<String>,
    /// Assessed acreage
    pub acreage: Option<f64>,
    /// Zoning designation
    pub zoning: Option<String>,
    /// Link to the recorded plat map, when one exists
    pub plat_map: Option<String>,
    /// Subdivision name, when platted
    pub subdivision: Option<String>,
    pub lot: Option<String>,
    pub block: Option<String>,
}

/// One line of the development summary fallback page.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryEntry {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DevelopmentSummary {
    #[serde(default)]
    entries: Vec<SummaryEntry>,
}

pub struct RecordProvider {
    client: reqwest::Client,
    base_url: String,
    easement_re: Regex,
}

impl RecordProvider {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            // Also matches "ESMT", the assessor's usual abbreviation
            easement_re: Regex::new(r"(?i)\beasements?\b|\besmt\b")
                .unwrap_or_else(|e| unreachable!("static regex: {e}")),
        }
    }

    async fn fetch_record(&self, id: &str) -> Result<(RecordDocument, String), ProviderError> {
        let url = format!("{}/API/Property/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(response.status(), "record service"));
        }
        let doc: RecordDocument = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        Ok((doc, url))
    }

    async fn fetch_summary(&self, id: &str) -> Result<(DevelopmentSummary, String), ProviderError> {
        let url = format!("{}/API/DevelopmentSummary/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(
                response.status(),
                "development summary",
            ));
        }
        let summary: DevelopmentSummary = response
            .json()
            .await
            .map_err(|e| ProviderError::ExtractionFailure(e.to_string()))?;
        Ok((summary, url))
    }

    /// Easement passages found in the development summary, joined, or
    /// None when the summary was checked and mentions none. Matches on
    /// the row label or the row text.
    fn scan_easements(&self, summary: &DevelopmentSummary) -> Option<String> {
        let hits: Vec<String> = summary
            .entries
            .iter()
            .filter(|e| self.easement_re.is_match(&e.label) || self.easement_re.is_match(&e.value))
            .map(|e| e.value.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if hits.is_empty() {
            None
        } else {
            Some(hits.join("; "))
        }
    }
}

/// Legal description from the record document's own plat fields, when
/// the parcel is platted.
fn legal_from_record(doc: &RecordDocument) -> Option<String> {
    let subdivision = doc.subdivision.as_deref()?.trim();
    if subdivision.is_empty() {
        return None;
    }
    let mut parts = vec![subdivision.to_string()];
    if let Some(lot) = doc.lot.as_deref().filter(|s| !s.trim().is_empty()) {
        parts.push(format!("Lot {}", lot.trim()));
    }
    if let Some(block) = doc.block.as_deref().filter(|s| !s.trim().is_empty()) {
        parts.push(format!("Block {}", block.trim()));
    }
    Some(parts.join(", "))
}

/// Named row from the development summary, trimmed, empty values dropped.
fn summary_value(summary: &DevelopmentSummary, label: &str) -> Option<String> {
    summary
        .entries
        .iter()
        .find(|e| e.label.eq_ignore_ascii_case(label))
        .map(|e| e.value.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl Provider for RecordProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::PropertyId]
    }

    fn supplies(&self) -> &'static [ContextKey] {
        &[
            ContextKey::ParcelNumber,
            ContextKey::SiteAddress,
            ContextKey::Zoning,
        ]
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult {
        let Some(id) = ctx.get_str(ContextKey::PropertyId) else {
            return ProviderResult::failure(
                self.id(),
                ProviderError::ExtractionFailure("no property id in context".to_string()),
            );
        };

        let (doc, record_url) = match self.fetch_record(id).await {
            Ok(ok) => ok,
            Err(e) => return ProviderResult::failure(self.id(), e),
        };
        debug!(property_id = %id, "Record document retrieved");

        let mut result = ProviderResult::success(self.id());
        let mut fields: Vec<FieldValue> = Vec::new();

        if let Some(owner) = doc.owner.as_deref().filter(|s| !s.is_empty()) {
            fields.push(FieldValue::text(PROVIDER_ID, "owner_name", owner, &record_url));
        }
        if let Some(mailing) = doc.mailing_address.as_deref().filter(|s| !s.is_empty()) {
            fields.push(FieldValue::text(
                PROVIDER_ID,
                "mailing_address",
                mailing,
                &record_url,
            ));
        }
        if let Some(situs) = doc.situs_address.as_deref().filter(|s| !s.is_empty()) {
            fields.push(FieldValue::text(PROVIDER_ID, "site_address", situs, &record_url));
            result = result.with_context(ContextKey::SiteAddress, serde_json::json!(situs));
        }
        if let Some(parcel) = doc.map_and_taxlot.as_deref().filter(|s| !s.is_empty()) {
            fields.push(FieldValue::text(
                PROVIDER_ID,
                "parcel_number",
                parcel,
                &record_url,
            ));
            result = result.with_context(ContextKey::ParcelNumber, serde_json::json!(parcel));
        }
        if let Some(acreage) = doc.acreage {
            fields.push(FieldValue::number(PROVIDER_ID, "acreage", acreage, &record_url));
        }
        if let Some(zoning) = doc.zoning.as_deref().filter(|s| !s.is_empty()) {
            fields.push(FieldValue::text(PROVIDER_ID, "zoning", zoning, &record_url));
            result = result.with_context(ContextKey::Zoning, serde_json::json!(zoning));
        }
        if let Some(plat) = doc.plat_map.as_deref().filter(|s| !s.is_empty()) {
            fields.push(FieldValue::text(PROVIDER_ID, "plat_map", plat, &record_url));
        }

        // Summary page carries the easement rows, the overlay row, and
        // the legal fallback. The record document's own plat fields
        // still win for legal. No easement claim is made at all when
        // the summary could not be checked.
        let record_legal = legal_from_record(&doc);
        let mut summary_error = None;
        match self.fetch_summary(id).await {
            Ok((summary, summary_url)) => {
                match self.scan_easements(&summary) {
                    Some(found) => fields.push(FieldValue::text(
                        PROVIDER_ID,
                        "easements",
                        found,
                        &summary_url,
                    )),
                    None => {
                        fields.push(FieldValue::absent(PROVIDER_ID, "easements", &summary_url))
                    }
                }
                if let Some(overlay) = summary_value(&summary, "overlay") {
                    fields.push(FieldValue::text(PROVIDER_ID, "overlay", overlay, &summary_url));
                }
                if record_legal.is_none() {
                    if let Some(legal) = summary_value(&summary, "legal") {
                        fields.push(FieldValue::text(
                            PROVIDER_ID,
                            "legal_description",
                            legal,
                            &summary_url,
                        ));
                    }
                }
            }
            Err(e) => {
                warn!(property_id = %id, "Development summary unavailable: {}", e);
                summary_error = Some(e);
            }
        }
        if let Some(legal) = record_legal {
            fields.push(FieldValue::text(
                PROVIDER_ID,
                "legal_description",
                legal,
                &record_url,
            ));
        }

        result = result.with_fields(fields);
        if let Some(e) = summary_error {
            result.status = crate::types::ProviderStatus::PartialSuccess { error: e };
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> RecordDocument {
        RecordDocument {
            owner: Some("SMITH, JOHN".to_string()),
            mailing_address: None,
            situs_address: Some("123 MAIN ST".to_string()),
            map_and_taxlot: Some("201118B010000".to_string()),
            acreage: Some(4.7),
            zoning: Some("EFU".to_string()),
            plat_map: Some("https://records.example/plats/TP-4.pdf".to_string()),
            subdivision: Some("TALL PINES".to_string()),
            lot: Some("4".to_string()),
            block: None,
        }
    }

    #[test]
    fn legal_description_built_from_plat_fields() {
        assert_eq!(
            legal_from_record(&doc()),
            Some("TALL PINES, Lot 4".to_string())
        );
    }

    #[test]
    fn unplatted_parcel_has_no_record_legal() {
        let mut d = doc();
        d.subdivision = None;
        assert_eq!(legal_from_record(&d), None);
        d.subdivision = Some("  ".to_string());
        assert_eq!(legal_from_record(&d), None);
    }

    #[test]
    fn summary_rows_match_labels_case_insensitively() {
        let summary = DevelopmentSummary {
            entries: vec![
                SummaryEntry {
                    label: "LEGAL".to_string(),
                    value: " T20 R11 S18 TL 100 ".to_string(),
                },
                SummaryEntry {
                    label: "Overlay".to_string(),
                    value: "Wildlife Area Combining Zone".to_string(),
                },
            ],
        };
        assert_eq!(
            summary_value(&summary, "legal"),
            Some("T20 R11 S18 TL 100".to_string())
        );
        assert_eq!(
            summary_value(&summary, "overlay"),
            Some("Wildlife Area Combining Zone".to_string())
        );
        assert_eq!(summary_value(&summary, "plat"), None);
    }

    #[test]
    fn easement_rows_matched_on_label_or_text() {
        let provider = RecordProvider::new(reqwest::Client::new(), String::new());
        let summary = DevelopmentSummary {
            entries: vec![
                SummaryEntry {
                    label: "Easements".to_string(),
                    value: "Utility along north line".to_string(),
                },
                SummaryEntry {
                    label: "Notation".to_string(),
                    value: "ACCESS ESMT PER MP-81-8".to_string(),
                },
                SummaryEntry {
                    label: "Sewer".to_string(),
                    value: "Septic approved 1994".to_string(),
                },
            ],
        };
        assert_eq!(
            provider.scan_easements(&summary),
            Some("Utility along north line; ACCESS ESMT PER MP-81-8".to_string())
        );

        let none = DevelopmentSummary {
            entries: vec![SummaryEntry {
                label: "Sewer".to_string(),
                value: "Septic approved 1994".to_string(),
            }],
        };
        assert!(provider.scan_easements(&none).is_none());
    }
}
