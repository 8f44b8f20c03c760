//! SQLite document store for local use and tests
//!
//! Same table layout as the PostgreSQL store with JSON text bodies handled by
//! the JSON1 functions. In-memory databases use a single-connection pool, so
//! sessions are serialized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

use crate::config::Config;
use crate::domain::{Collection, Document, DocumentFilter, DocumentKey, SequenceName};
use crate::infra::{CoreError, DocumentStore, Result};

type DocumentRow = (String, String, String, String);

/// SQLite-backed document store
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Create a new store over an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect using the loaded configuration
    pub async fn connect(config: &Config) -> Result<Self> {
        let options = if config.database_url.contains(":memory:") {
            Self::memory_pool_options()
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };
        let pool = options.connect(&config.database_url).await?;
        Ok(Self { pool })
    }

    /// Fresh, migrated in-memory store
    pub async fn in_memory() -> Result<Self> {
        let pool = Self::memory_pool_options()
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// An in-memory database lives and dies with its only connection
    fn memory_pool_options() -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    }

    /// Apply embedded migrations
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool)
            .await
            .map_err(|e| CoreError::Configuration(e.to_string()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn json_path(field: &str) -> String {
        format!("$.{field}")
    }

    fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| CoreError::InvalidDocument(format!("bad timestamp {raw:?}: {e}")))
    }

    fn into_document(collection: Collection, row: DocumentRow) -> Result<Document> {
        let (id, body, created_at, updated_at) = row;
        Ok(Document {
            collection,
            id,
            body: serde_json::from_str(&body)?,
            created_at: Self::parse_timestamp(&created_at)?,
            updated_at: Self::parse_timestamp(&updated_at)?,
        })
    }

    /// Filter conditions as (json path, json text) bind pairs
    fn filter_binds(filter: &DocumentFilter) -> Result<Vec<(String, String)>> {
        filter
            .conditions()
            .iter()
            .map(|(field, value)| Ok((Self::json_path(field), serde_json::to_string(value)?)))
            .collect()
    }

    fn filter_sql(filter: &DocumentFilter) -> String {
        " AND json_extract(body, ?) = json_extract(?, '$')".repeat(filter.conditions().len())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    type Session = Transaction<'static, Sqlite>;

    async fn start_session(&self) -> Result<Self::Session> {
        Ok(self.pool.begin().await?)
    }

    async fn commit_session(&self, session: Self::Session) -> Result<()> {
        session.commit().await?;
        Ok(())
    }

    async fn abort_session(&self, session: Self::Session) -> Result<()> {
        session.rollback().await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(sequence = %name, in_session = session.is_some()))]
    async fn increment_sequence(
        &self,
        name: &SequenceName,
        session: Option<&mut Self::Session>,
    ) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let query = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO sequence_counters (name, value, updated_at)
            VALUES (?, 1, ?)
            ON CONFLICT (name)
            DO UPDATE SET
                value = sequence_counters.value + 1,
                updated_at = excluded.updated_at
            RETURNING value
            "#,
        )
        .bind(name.as_str())
        .bind(&now);

        let row = match session {
            Some(tx) => query.fetch_one(&mut **tx).await?,
            None => query.fetch_one(&self.pool).await?,
        };

        Ok(row.0 as u64)
    }

    #[instrument(skip(self), fields(sequence = %name))]
    async fn rewind_sequence(&self, name: &SequenceName, expected_head: u64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sequence_counters
            SET value = value - 1,
                updated_at = ?
            WHERE name = ? AND value = ? AND value > 0
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(name.as_str())
        .bind(expected_head as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn sequence_head(&self, name: &SequenceName) -> Result<u64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT value FROM sequence_counters WHERE name = ?")
                .bind(name.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|r| r.0 as u64).unwrap_or(0))
    }

    #[instrument(skip(self, document, session), fields(collection = %document.collection, id = %document.id))]
    async fn insert(
        &self,
        document: &Document,
        session: Option<&mut Self::Session>,
    ) -> Result<()> {
        let body = serde_json::to_string(&document.body)?;
        let query = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(document.collection.as_str())
        .bind(&document.id)
        .bind(&body)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339());

        let result = match session {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        };

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                CoreError::duplicate(document.collection, format!("id {}", document.id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn find(
        &self,
        key: &DocumentKey,
        session: Option<&mut Self::Session>,
    ) -> Result<Option<Document>> {
        let query = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, body, created_at, updated_at
            FROM documents
            WHERE collection = ? AND id = ?
            "#,
        )
        .bind(key.collection.as_str())
        .bind(&key.id);

        let row = match session {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        row.map(|r| Self::into_document(key.collection, r))
            .transpose()
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &DocumentFilter,
        session: Option<&mut Self::Session>,
    ) -> Result<Option<Document>> {
        let sql = format!(
            "SELECT id, body, created_at, updated_at FROM documents WHERE collection = ?{} ORDER BY created_at, id LIMIT 1",
            Self::filter_sql(filter)
        );
        let binds = Self::filter_binds(filter)?;

        let mut query = sqlx::query_as::<_, DocumentRow>(&sql).bind(collection.as_str());
        for (path, value) in &binds {
            query = query.bind(path.as_str()).bind(value.as_str());
        }

        let row = match session {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        row.map(|r| Self::into_document(collection, r)).transpose()
    }

    async fn count(&self, collection: Collection, filter: &DocumentFilter) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM documents WHERE collection = ?{}",
            Self::filter_sql(filter)
        );
        let binds = Self::filter_binds(filter)?;

        let mut query = sqlx::query_as::<_, (i64,)>(&sql).bind(collection.as_str());
        for (path, value) in &binds {
            query = query.bind(path.as_str()).bind(value.as_str());
        }

        let row = query.fetch_one(&self.pool).await?;
        Ok(row.0 as u64)
    }

    #[instrument(skip(self, key, session), fields(key = %key))]
    async fn increment_field(
        &self,
        key: &DocumentKey,
        field: &str,
        delta: i64,
        session: Option<&mut Self::Session>,
    ) -> Result<i64> {
        let path = Self::json_path(field);
        let query = sqlx::query_as::<_, (i64,)>(
            r#"
            UPDATE documents
            SET body = json_set(body, ?, COALESCE(json_extract(body, ?), 0) + ?),
                updated_at = ?
            WHERE collection = ? AND id = ?
            RETURNING json_extract(body, ?)
            "#,
        )
        .bind(&path)
        .bind(&path)
        .bind(delta)
        .bind(Utc::now().to_rfc3339())
        .bind(key.collection.as_str())
        .bind(&key.id)
        .bind(&path);

        let row = match session {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        row.map(|r| r.0)
            .ok_or_else(|| CoreError::not_found(key.collection, key.id.clone()))
    }

    async fn set_field(
        &self,
        key: &DocumentKey,
        field: &str,
        value: &Value,
        session: Option<&mut Self::Session>,
    ) -> Result<()> {
        let value = serde_json::to_string(value)?;
        let query = sqlx::query(
            r#"
            UPDATE documents
            SET body = json_set(body, ?, json(?)),
                updated_at = ?
            WHERE collection = ? AND id = ?
            "#,
        )
        .bind(Self::json_path(field))
        .bind(&value)
        .bind(Utc::now().to_rfc3339())
        .bind(key.collection.as_str())
        .bind(&key.id);

        let result = match session {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(key.collection, key.id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self, key, guard, value, session), fields(key = %key))]
    async fn set_field_if(
        &self,
        key: &DocumentKey,
        guard: &DocumentFilter,
        field: &str,
        value: &Value,
        session: Option<&mut Self::Session>,
    ) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE documents
            SET body = json_set(body, ?, json(?)),
                updated_at = ?
            WHERE collection = ? AND id = ?{}
            "#,
            Self::filter_sql(guard)
        );
        let value = serde_json::to_string(value)?;
        let binds = Self::filter_binds(guard)?;

        let mut query = sqlx::query(&sql)
            .bind(Self::json_path(field))
            .bind(&value)
            .bind(Utc::now().to_rfc3339())
            .bind(key.collection.as_str())
            .bind(&key.id);
        for (path, expected) in &binds {
            query = query.bind(path.as_str()).bind(expected.as_str());
        }

        let result = match session {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };

        Ok(result.rows_affected() == 1)
    }
}
