//! Building the final property record from provider results

use super::merge::{Candidate, MergePolicy};
use super::scheduler::SequencedResult;
use crate::types::FieldValue;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// One resolved profile field, with the candidates that lost kept for
/// audit.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedField {
    pub resolved: FieldValue,
    /// Policy rank of the winning provider (0 = highest priority)
    pub rank: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<FieldValue>,
}

/// The merged profile for one property. Fields for which no acceptable
/// candidate had a value are absent from the map; absence is the
/// "unavailable" state, never an empty string.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyRecord {
    pub property_id: String,
    pub fields: BTreeMap<String, ResolvedField>,
}

impl PropertyRecord {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).map(|f| &f.resolved)
    }
}

/// Walk every field the policy declares, gather that field's candidates
/// from all provider results, and resolve each one.
pub fn aggregate(
    property_id: &str,
    policy: &MergePolicy,
    results: &[SequencedResult],
) -> PropertyRecord {
    let mut by_field: BTreeMap<&str, Vec<Candidate>> = BTreeMap::new();
    for sr in results {
        for field in &sr.result.emitted {
            if policy.rank(&field.name, field.provider_id).is_none() {
                debug!(
                    provider = field.provider_id,
                    field = %field.name,
                    "Dropping observation with no policy entry"
                );
                continue;
            }
            by_field.entry(field.name.as_str()).or_default().push(Candidate {
                field: field.clone(),
                sequence: sr.sequence,
            });
        }
    }

    let mut fields = BTreeMap::new();
    for name in policy.field_names() {
        let Some(candidates) = by_field.get(name) else {
            continue;
        };
        if let Some((winner, rank)) = policy.resolve(name, candidates) {
            fields.insert(
                name.to_string(),
                ResolvedField {
                    resolved: winner.field.clone(),
                    rank,
                    candidates: candidates
                        .iter()
                        .filter(|c| !std::ptr::eq(*c, winner))
                        .map(|c| c.field.clone())
                        .collect(),
                },
            );
        }
    }

    PropertyRecord {
        property_id: property_id.to_string(),
        fields,
    }
}
