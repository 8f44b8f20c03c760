//! Schema for the document stores
//!
//! Both backends carry the same two tables:
//!
//! - `sequence_counters`: one row per id sequence (`STR`, `MDL`, ...) holding
//!   the last allocated value; never negative.
//! - `documents`: every collection in one table keyed by
//!   `(collection, id)`, with the entity body as JSON (`jsonb` on Postgres,
//!   validated text on SQLite).

use anyhow::Context;
use sqlx::migrate::Migrator;
use sqlx::{PgPool, SqlitePool};
use tracing::debug;

static POSTGRES_SCHEMA: Migrator = sqlx::migrate!("migrations/postgres");
static SQLITE_SCHEMA: Migrator = sqlx::migrate!("migrations/sqlite");

/// Bring a Postgres database up to the current document schema
pub async fn run_postgres(pool: &PgPool) -> anyhow::Result<()> {
    POSTGRES_SCHEMA
        .run(pool)
        .await
        .context("applying postgres document schema")?;
    debug!(versions = POSTGRES_SCHEMA.iter().count(), "Postgres schema ready");
    Ok(())
}

/// Bring a SQLite database up to the current document schema.
///
/// Safe to call on every open; applied versions are skipped.
pub async fn run_sqlite(pool: &SqlitePool) -> anyhow::Result<()> {
    SQLITE_SCHEMA
        .run(pool)
        .await
        .context("applying sqlite document schema")?;
    debug!(versions = SQLITE_SCHEMA.iter().count(), "SQLite schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn test_backends_share_schema_versions() {
        let postgres: Vec<i64> = POSTGRES_SCHEMA.iter().map(|m| m.version).collect();
        let sqlite: Vec<i64> = SQLITE_SCHEMA.iter().map(|m| m.version).collect();
        assert_eq!(postgres, sqlite);
    }

    #[tokio::test]
    async fn test_sqlite_schema_reapplies_cleanly() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run_sqlite(&pool).await.unwrap();
        run_sqlite(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name IN ('documents', 'sequence_counters') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, ["documents", "sequence_counters"]);
    }
}
