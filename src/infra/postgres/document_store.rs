//! PostgreSQL document store
//!
//! Documents live in a single `documents` table with JSONB bodies. Counter
//! fields and sequence counters are only ever changed by single UPDATE
//! statements, so concurrent increments serialize on the row lock.
//!
//! # Atomicity
//!
//! Sequence allocation is one upsert:
//! ```sql
//! INSERT INTO sequence_counters (name, value) VALUES ($1, 1)
//! ON CONFLICT (name) DO UPDATE SET value = sequence_counters.value + 1
//! RETURNING value;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tracing::instrument;

use crate::config::Config;
use crate::domain::{Collection, Document, DocumentFilter, DocumentKey, SequenceName};
use crate::infra::{CoreError, DocumentStore, Result};

type DocumentRow = (String, Json<Value>, DateTime<Utc>, DateTime<Utc>);

/// PostgreSQL-backed document store
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the loaded configuration
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply embedded migrations
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_postgres(&self.pool)
            .await
            .map_err(|e| CoreError::Configuration(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn into_document(collection: Collection, row: DocumentRow) -> Document {
        let (id, body, created_at, updated_at) = row;
        Document {
            collection,
            id,
            body: body.0,
            created_at,
            updated_at,
        }
    }

    /// `AND body -> $n = $n+1` for every filter condition, numbered after
    /// the `first_param - 1` fixed parameters.
    fn filter_sql(filter: &DocumentFilter, first_param: usize) -> String {
        let mut sql = String::new();
        for i in 0..filter.conditions().len() {
            let field_param = first_param + i * 2;
            sql.push_str(&format!(
                " AND body -> ${}::text = ${}::jsonb",
                field_param,
                field_param + 1
            ));
        }
        sql
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    type Session = Transaction<'static, Postgres>;

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
        let query = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO sequence_counters (name, value, updated_at)
            VALUES ($1, 1, NOW())
            ON CONFLICT (name)
            DO UPDATE SET
                value = sequence_counters.value + 1,
                updated_at = NOW()
            RETURNING value
            "#,
        )
        .bind(name.as_str());

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
                updated_at = NOW()
            WHERE name = $1 AND value = $2 AND value > 0
            "#,
        )
        .bind(name.as_str())
        .bind(expected_head as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn sequence_head(&self, name: &SequenceName) -> Result<u64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT value FROM sequence_counters WHERE name = $1")
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
        let query = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(document.collection.as_str())
        .bind(&document.id)
        .bind(Json(&document.body))
        .bind(document.created_at)
        .bind(document.updated_at);

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
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(key.collection.as_str())
        .bind(&key.id);

        let row = match session {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        Ok(row.map(|r| Self::into_document(key.collection, r)))
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: &DocumentFilter,
        session: Option<&mut Self::Session>,
    ) -> Result<Option<Document>> {
        let sql = format!(
            "SELECT id, body, created_at, updated_at FROM documents WHERE collection = $1{} ORDER BY created_at, id LIMIT 1",
            Self::filter_sql(filter, 2)
        );

        let mut query = sqlx::query_as::<_, DocumentRow>(&sql).bind(collection.as_str());
        for (field, value) in filter.conditions() {
            query = query.bind(field.as_str()).bind(Json(value));
        }

        let row = match session {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        Ok(row.map(|r| Self::into_document(collection, r)))
    }

    async fn count(&self, collection: Collection, filter: &DocumentFilter) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM documents WHERE collection = $1{}",
            Self::filter_sql(filter, 2)
        );

        let mut query = sqlx::query_as::<_, (i64,)>(&sql).bind(collection.as_str());
        for (field, value) in filter.conditions() {
            query = query.bind(field.as_str()).bind(Json(value));
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
        let query = sqlx::query_as::<_, (i64,)>(
            r#"
            UPDATE documents
            SET body = jsonb_set(
                    body,
                    ARRAY[$3::text],
                    to_jsonb(COALESCE((body ->> $3::text)::bigint, 0) + $4::bigint)
                ),
                updated_at = NOW()
            WHERE collection = $1 AND id = $2
            RETURNING (body ->> $3::text)::bigint
            "#,
        )
        .bind(key.collection.as_str())
        .bind(&key.id)
        .bind(field)
        .bind(delta);

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
        let query = sqlx::query(
            r#"
            UPDATE documents
            SET body = jsonb_set(body, ARRAY[$3::text], $4::jsonb),
                updated_at = NOW()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(key.collection.as_str())
        .bind(&key.id)
        .bind(field)
        .bind(Json(value));

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
            SET body = jsonb_set(body, ARRAY[$3::text], $4::jsonb),
                updated_at = NOW()
            WHERE collection = $1 AND id = $2{}
            "#,
            Self::filter_sql(guard, 5)
        );

        let mut query = sqlx::query(&sql)
            .bind(key.collection.as_str())
            .bind(&key.id)
            .bind(field)
            .bind(Json(value));
        for (name, expected) in guard.conditions() {
            query = query.bind(name.as_str()).bind(Json(expected));
        }

        let result = match session {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };

        Ok(result.rows_affected() == 1)
    }
}
