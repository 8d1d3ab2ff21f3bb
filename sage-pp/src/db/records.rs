//! Writing merged profiles to the category tables

use super::schema::{self, CategoryTable, CATEGORY_TABLES};
use crate::pipeline::PropertyRecord;
use crate::types::Scalar;
use sage_common::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Upsert `record` into every category table once.
pub async fn persist_record(pool: &SqlitePool, record: &PropertyRecord) -> Result<()> {
    for table in CATEGORY_TABLES {
        upsert_category(pool, table, record).await?;
    }
    Ok(())
}

/// Upsert with bounded retries. SQLite write contention under concurrent
/// runs shows up as transient busy errors, so a short backoff usually
/// clears it.
pub async fn persist_with_retry(pool: &SqlitePool, record: &PropertyRecord) -> Result<()> {
    let mut attempt = 1;
    loop {
        match persist_record(pool, record).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(
                    property_id = %record.property_id,
                    attempt,
                    "Persist attempt failed, retrying: {}",
                    e
                );
                tokio::time::sleep(RETRY_BACKOFF).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn upsert_category(
    pool: &SqlitePool,
    table: &CategoryTable,
    record: &PropertyRecord,
) -> Result<()> {
    let sql = schema::upsert_sql(table);
    let mut query = sqlx::query(&sql).bind(&record.property_id);
    for col in table.columns {
        match record.fields.get(*col) {
            Some(resolved) => {
                let value = resolved.resolved.value.as_ref().map(scalar_to_text);
                query = query
                    .bind(value)
                    .bind(Some(resolved.resolved.source.clone()))
                    .bind(Some(resolved.rank as i64));
            }
            None => {
                query = query
                    .bind(None::<String>)
                    .bind(None::<String>)
                    .bind(None::<i64>);
            }
        }
    }
    query.execute(pool).await?;
    Ok(())
}

/// Canonical text rendering of a scalar for storage.
fn scalar_to_text(value: &Scalar) -> String {
    match value {
        Scalar::Text(s) => s.clone(),
        Scalar::Number(n) => n.to_string(),
        Scalar::Flag(b) => b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ResolvedField;
    use crate::types::FieldValue;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::BTreeMap;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_schema(&pool).await.unwrap();
        pool
    }

    fn record_with(
        property_id: &str,
        fields: &[(&str, Option<&str>, &str, usize)],
    ) -> PropertyRecord {
        let mut map = BTreeMap::new();
        for (name, value, source, rank) in fields {
            let resolved = match value {
                Some(v) => FieldValue::text("records", *name, *v, *source),
                None => FieldValue::absent("records", *name, *source),
            };
            map.insert(
                name.to_string(),
                ResolvedField {
                    resolved,
                    rank: *rank,
                    candidates: Vec::new(),
                },
            );
        }
        PropertyRecord {
            property_id: property_id.to_string(),
            fields: map,
        }
    }

    async fn stored_owner(pool: &SqlitePool) -> (Option<String>, Option<String>, Option<i64>) {
        sqlx::query_as(
            "SELECT owner_name, owner_name_source, owner_name_rank FROM basic_info \
             WHERE property_id = '131214'",
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn first_persist_stores_value_with_provenance() {
        let pool = memory_pool().await;
        let record = record_with("131214", &[("owner_name", Some("SMITH"), "record page", 0)]);
        persist_record(&pool, &record).await.unwrap();

        let (value, source, rank) = stored_owner(&pool).await;
        assert_eq!(value.as_deref(), Some("SMITH"));
        assert_eq!(source.as_deref(), Some("record page"));
        assert_eq!(rank, Some(0));
    }

    #[tokio::test]
    async fn unavailable_run_does_not_erase_stored_value() {
        let pool = memory_pool().await;
        let first = record_with("131214", &[("owner_name", Some("SMITH"), "record page", 0)]);
        persist_record(&pool, &first).await.unwrap();

        // Second run found nothing for owner_name at all
        let second = record_with("131214", &[]);
        persist_record(&pool, &second).await.unwrap();

        let (value, _, _) = stored_owner(&pool).await;
        assert_eq!(value.as_deref(), Some("SMITH"));
    }

    #[tokio::test]
    async fn lower_priority_value_cannot_replace_higher() {
        let pool = memory_pool().await;
        let first = record_with("131214", &[("owner_name", Some("SMITH"), "record page", 0)]);
        persist_record(&pool, &first).await.unwrap();

        let second = record_with("131214", &[("owner_name", Some("SMITH J"), "gis layer", 1)]);
        persist_record(&pool, &second).await.unwrap();

        let (value, source, _) = stored_owner(&pool).await;
        assert_eq!(value.as_deref(), Some("SMITH"));
        assert_eq!(source.as_deref(), Some("record page"));
    }

    #[tokio::test]
    async fn equal_priority_value_replaces_stored() {
        let pool = memory_pool().await;
        let first = record_with("131214", &[("owner_name", Some("SMITH"), "record page", 0)]);
        persist_record(&pool, &first).await.unwrap();

        let second = record_with(
            "131214",
            &[("owner_name", Some("SMITH FAMILY TRUST"), "record page", 0)],
        );
        persist_record(&pool, &second).await.unwrap();

        let (value, _, _) = stored_owner(&pool).await;
        assert_eq!(value.as_deref(), Some("SMITH FAMILY TRUST"));
    }

    #[tokio::test]
    async fn gap_in_stored_row_accepts_any_priority() {
        let pool = memory_pool().await;
        let first = record_with("131214", &[("owner_name", Some("SMITH"), "record page", 0)]);
        persist_record(&pool, &first).await.unwrap();

        // site_address was never stored, a cross-reference value fills it
        let second = record_with(
            "131214",
            &[("site_address", Some("123 MAIN ST"), "gis layer", 1)],
        );
        persist_record(&pool, &second).await.unwrap();

        let (address,): (Option<String>,) = sqlx::query_as(
            "SELECT site_address FROM basic_info WHERE property_id = '131214'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(address.as_deref(), Some("123 MAIN ST"));
    }
}
