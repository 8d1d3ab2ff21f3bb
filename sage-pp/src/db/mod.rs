//! Profile persistence

pub mod records;
pub mod schema;

pub use records::{persist_record, persist_with_retry};
pub use schema::CATEGORY_TABLES;

use sage_common::Result;
use sqlx::SqlitePool;

/// Create the category tables if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for table in schema::CATEGORY_TABLES {
        sqlx::query(&schema::create_table_sql(table))
            .execute(pool)
            .await?;
    }
    Ok(())
}
