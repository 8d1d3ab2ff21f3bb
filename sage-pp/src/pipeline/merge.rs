//! Per-field merge priorities
//!
//! Each profile field carries an ordered list of priority tiers, each
//! tier holding one or more provider ids of equal standing. The first
//! tier with a non-empty observation wins; within a tier, the provider
//! that completed earliest wins. Providers not listed for a field cannot
//! contribute to it. Administrative evidence is ordered ahead of
//! extraction, extraction ahead of cross-reference, and inferred or
//! heuristic evidence last.

use crate::types::FieldValue;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MergePolicy {
    priorities: HashMap<&'static str, Vec<Vec<&'static str>>>,
}

/// A merge candidate: an observation plus the completion sequence of the
/// provider that produced it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub field: FieldValue,
    pub sequence: u64,
}

fn tiers(providers: &[&'static str]) -> Vec<Vec<&'static str>> {
    providers.iter().map(|&p| vec![p]).collect()
}

impl MergePolicy {
    pub fn new(priorities: HashMap<&'static str, Vec<Vec<&'static str>>>) -> Self {
        Self { priorities }
    }

    /// The production field catalogue with its provider orderings.
    pub fn standard() -> Self {
        let mut p: HashMap<&'static str, Vec<Vec<&'static str>>> = HashMap::new();

        // Administrative record first, GIS cross-reference fills gaps
        p.insert("owner_name", tiers(&["records", "gis"]));
        p.insert("site_address", tiers(&["records", "gis"]));
        p.insert("mailing_address", tiers(&["records"]));
        p.insert("parcel_number", tiers(&["records"]));
        p.insert("acreage", tiers(&["records", "gis"]));
        p.insert("legal_description", tiers(&["records"]));
        p.insert("plat_map", tiers(&["records"]));
        p.insert("easements", tiers(&["records"]));
        p.insert("zoning", tiers(&["records", "gis"]));
        p.insert("overlay", tiers(&["records"]));

        // Geospatial observations
        p.insert("gps_coord", tiers(&["geocode"]));
        p.insert("elevation_ft", tiers(&["slope"]));
        p.insert("slope_percent", tiers(&["slope"]));
        p.insert("trees_present", tiers(&["imagery"]));
        p.insert("power_visible", tiers(&["power"]));

        // Permit evidence outranks the imagery heuristic
        p.insert("structures_present", tiers(&["permits", "imagery"]));
        p.insert("structure_status", tiers(&["permits"]));

        // Engineering parameters from the design-standards sources
        p.insert("snow_load", tiers(&["design"]));
        p.insert("wind_speed_basic", tiers(&["design"]));
        p.insert("wind_speed_ultimate", tiers(&["design"]));
        p.insert("frost_depth", tiers(&["design"]));
        p.insert("exposure_category", tiers(&["design"]));
        p.insert("seismic_category", tiers(&["design"]));

        // Narrative-derived planning fields
        p.insert("setback_front", tiers(&["planning"]));
        p.insert("setback_side", tiers(&["planning"]));
        p.insert("setback_rear", tiers(&["planning"]));
        p.insert("setback_solar", tiers(&["planning"]));
        p.insert("setback_special", tiers(&["planning"]));
        p.insert("max_lot_coverage", tiers(&["planning"]));
        p.insert("max_building_height", tiers(&["planning"]));
        p.insert("wildfire_hazard", tiers(&["planning"]));
        p.insert("jurisdiction", tiers(&["planning"]));
        p.insert("fire_district", tiers(&["planning"]));

        // Utilities: service-provider narrative outranks street-view inference
        p.insert("water_type", tiers(&["utilities"]));
        p.insert("wastewater_type", tiers(&["utilities"]));
        p.insert("power_type", tiers(&["utilities", "power"]));

        Self::new(p)
    }

    /// Field names this policy knows about, in stable order.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.priorities.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Priority rank of `provider_id` for `field` (0 = highest), or None
    /// if the provider is not an acceptable source for the field.
    pub fn rank(&self, field: &str, provider_id: &str) -> Option<usize> {
        self.priorities
            .get(field)?
            .iter()
            .position(|tier| tier.contains(&provider_id))
    }

    /// Pick the winning candidate for `field`: lowest rank, then lowest
    /// completion sequence within a rank. Candidates without a value, or
    /// from providers not listed for the field, never win.
    pub fn resolve<'a>(
        &self,
        field: &str,
        candidates: &'a [Candidate],
    ) -> Option<(&'a Candidate, usize)> {
        candidates
            .iter()
            .filter(|c| c.field.value.is_some())
            .filter_map(|c| self.rank(field, c.field.provider_id).map(|r| (c, r)))
            .min_by_key(|(c, r)| (*r, c.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(provider_id: &'static str, value: Option<&str>, sequence: u64) -> Candidate {
        Candidate {
            field: match value {
                Some(v) => FieldValue::text(provider_id, "owner_name", v, "test"),
                None => FieldValue::absent(provider_id, "owner_name", "test"),
            },
            sequence,
        }
    }

    #[test]
    fn higher_priority_provider_wins_regardless_of_order() {
        let policy = MergePolicy::standard();
        let candidates = vec![
            candidate("gis", Some("GIS OWNER"), 0),
            candidate("records", Some("RECORD OWNER"), 5),
        ];
        let (winner, rank) = policy.resolve("owner_name", &candidates).unwrap();
        assert_eq!(winner.field.provider_id, "records");
        assert_eq!(rank, 0);
    }

    #[test]
    fn lower_priority_fills_gap_when_higher_is_empty() {
        let policy = MergePolicy::standard();
        let candidates = vec![
            candidate("records", None, 0),
            candidate("gis", Some("GIS OWNER"), 1),
        ];
        let (winner, rank) = policy.resolve("owner_name", &candidates).unwrap();
        assert_eq!(winner.field.provider_id, "gis");
        assert_eq!(rank, 1);
    }

    #[test]
    fn unlisted_provider_cannot_contribute() {
        let policy = MergePolicy::standard();
        let candidates = vec![candidate("imagery", Some("BOGUS"), 0)];
        assert!(policy.resolve("owner_name", &candidates).is_none());
    }

    #[test]
    fn equal_tier_breaks_tie_by_completion_sequence() {
        let mut priorities = HashMap::new();
        priorities.insert("f", vec![vec!["east", "west"]]);
        let policy = MergePolicy::new(priorities);
        let candidates = vec![
            Candidate {
                field: FieldValue::text("west", "f", "w", "s"),
                sequence: 3,
            },
            Candidate {
                field: FieldValue::text("east", "f", "e", "s"),
                sequence: 1,
            },
        ];
        let (winner, rank) = policy.resolve("f", &candidates).unwrap();
        assert_eq!(winner.field.provider_id, "east");
        assert_eq!(rank, 0);
        // Deterministic under repetition
        assert_eq!(
            policy.resolve("f", &candidates).unwrap().0.field.provider_id,
            "east"
        );
    }

    #[test]
    fn all_empty_candidates_resolve_to_unavailable() {
        let policy = MergePolicy::standard();
        let candidates = vec![candidate("records", None, 0), candidate("gis", None, 1)];
        assert!(policy.resolve("owner_name", &candidates).is_none());
    }
}
