//! Category table layout and SQL generation
//!
//! One row per canonical property id per category table. Every sourced
//! column is a triplet: the value, a `_source` provenance column, and a
//! `_rank` column holding the merge-policy rank the value was stored at.
//! The rank is what makes upserts monotone across runs: an incoming
//! value only replaces a stored one when the stored value is null or the
//! incoming rank is at least as good (lower).

/// One category sub-table. Column names double as profile field names.
pub struct CategoryTable {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

pub const CATEGORY_TABLES: &[CategoryTable] = &[
    CategoryTable {
        name: "basic_info",
        columns: &[
            "owner_name",
            "site_address",
            "mailing_address",
            "parcel_number",
            "acreage",
            "legal_description",
            "plat_map",
            "easements",
        ],
    },
    CategoryTable {
        name: "design_data",
        columns: &[
            "snow_load",
            "wind_speed_basic",
            "wind_speed_ultimate",
            "frost_depth",
            "exposure_category",
            "seismic_category",
        ],
    },
    CategoryTable {
        name: "geo_info",
        columns: &[
            "gps_coord",
            "elevation_ft",
            "slope_percent",
            "trees_present",
            "structures_present",
            "structure_status",
            "power_visible",
        ],
    },
    CategoryTable {
        name: "planning_data",
        columns: &[
            "zoning",
            "overlay",
            "jurisdiction",
            "fire_district",
            "setback_front",
            "setback_side",
            "setback_rear",
            "setback_solar",
            "setback_special",
            "max_lot_coverage",
            "max_building_height",
            "wildfire_hazard",
        ],
    },
    CategoryTable {
        name: "utility_details",
        columns: &["water_type", "wastewater_type", "power_type"],
    },
];

/// CREATE TABLE statement for one category table.
pub fn create_table_sql(table: &CategoryTable) -> String {
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    property_id TEXT PRIMARY KEY",
        table.name
    );
    for col in table.columns {
        sql.push_str(&format!(
            ",\n    {col} TEXT,\n    {col}_source TEXT,\n    {col}_rank INTEGER"
        ));
    }
    sql.push_str(",\n    updated_at TEXT NOT NULL\n)");
    sql
}

/// Conditional upsert for one category table.
///
/// On conflict, each column triplet is replaced only when the incoming
/// value is non-null AND (the stored value is null OR the incoming rank
/// is at least as high-priority as the stored rank). A run that found
/// nothing for a field therefore never erases an earlier run's value,
/// and a lower-priority source never clobbers a higher-priority one.
pub fn upsert_sql(table: &CategoryTable) -> String {
    let mut cols = vec!["property_id".to_string()];
    for col in table.columns {
        cols.push(col.to_string());
        cols.push(format!("{col}_source"));
        cols.push(format!("{col}_rank"));
    }
    cols.push("updated_at".to_string());

    let placeholders = vec!["?"; cols.len() - 1].join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({}, datetime('now'))\nON CONFLICT(property_id) DO UPDATE SET",
        table.name,
        cols.join(", "),
        placeholders
    );

    let t = table.name;
    let mut first = true;
    for col in table.columns {
        let guard = format!(
            "excluded.{col} IS NOT NULL AND ({t}.{col} IS NULL OR excluded.{col}_rank <= {t}.{col}_rank)"
        );
        for suffix in ["", "_source", "_rank"] {
            let sep = if first { "\n    " } else { ",\n    " };
            first = false;
            sql.push_str(&format!(
                "{sep}{col}{suffix} = CASE WHEN {guard} THEN excluded.{col}{suffix} ELSE {t}.{col}{suffix} END"
            ));
        }
    }
    sql.push_str(",\n    updated_at = excluded.updated_at");
    sql
}
