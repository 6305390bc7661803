//! PostgreSQL implementation of the document store.
//!
//! One table per collection with the document in a JSONB column. Unique
//! constraints are expression indexes named after [`UNIQUE_INDEXES`] entries,
//! so a violation can be reported against the right fields.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    Aggregate, Collection, DocumentStore, StoreError, StoreResult, UNIQUE_INDEXES,
    document_created_at, document_id, sanitize_patch,
};
use crate::query::sql::SqlQueryBuilder;
use crate::query::{Filter, FindQuery};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Translate unique violations; everything else is unexpected.
fn map_write_error(err: sqlx::Error, doc: &Value, context: &'static str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.is_unique_violation()
    {
        let constraint = db_err.constraint().unwrap_or_default();
        if let Some(index) = UNIQUE_INDEXES.iter().find(|idx| idx.name == constraint) {
            return index.duplicate_error(doc);
        }
        return StoreError::Duplicate {
            fields: Vec::new(),
            value: constraint.to_string(),
        };
    }
    StoreError::Unexpected(anyhow::Error::new(err).context(context))
}

#[async_trait]
impl DocumentStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn find(&self, collection: Collection, query: &FindQuery) -> StoreResult<Vec<Value>> {
        let sql = SqlQueryBuilder::new(collection.table(), query).build();
        let docs = sqlx::query_scalar::<_, Value>(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to query {}", collection.table()))?;
        Ok(docs)
    }

    async fn count(&self, collection: Collection, filters: &[Filter]) -> StoreResult<u64> {
        let query = FindQuery::scoped(filters.to_vec());
        let sql = SqlQueryBuilder::new(collection.table(), &query).build_count();
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to count {}", collection.table()))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn insert(&self, collection: Collection, doc: Value) -> StoreResult<Value> {
        let id = document_id(&doc)?;
        let created_at = document_created_at(&doc)?;
        let sql = format!(
            "INSERT INTO {} (id, created_at, doc) VALUES ($1, $2, $3) RETURNING doc",
            collection.table()
        );
        sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .bind(created_at)
            .bind(&doc)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, &doc, "failed to insert document"))
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> StoreResult<Option<Value>> {
        let patch = Value::Object(sanitize_patch(patch));
        let sql = format!(
            "UPDATE {} SET doc = doc || $2, version = version + 1 WHERE id = $1 RETURNING doc",
            collection.table()
        );
        sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .bind(&patch)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_write_error(e, &patch, "failed to update document"))
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Value>> {
        let sql = format!("DELETE FROM {} WHERE id = $1 RETURNING doc", collection.table());
        let removed = sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to delete document")?;
        Ok(removed)
    }

    async fn aggregate(
        &self,
        collection: Collection,
        filters: &[Filter],
        field: &str,
    ) -> StoreResult<Aggregate> {
        let query = FindQuery::scoped(filters.to_vec());
        let sql = SqlQueryBuilder::new(collection.table(), &query).build_aggregate(field);
        let (count, mean): (i64, Option<f64>) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to aggregate {}", collection.table()))?;
        Ok(Aggregate {
            count: u64::try_from(count).unwrap_or_default(),
            mean,
        })
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database health check failed")?;
        Ok(())
    }
}
