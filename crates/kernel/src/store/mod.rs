//! Document storage.
//!
//! Resources are stored as JSON documents in one collection per resource kind.
//! [`DocumentStore`] is implemented by [`postgres::PostgresStore`] for real
//! deployments and [`memory::InMemoryStore`] for local development and tests.
//! Both evaluate the same [`FindQuery`] and enforce the same unique indexes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::query::{CREATED_AT_FIELD, Filter, FindQuery, ID_FIELD, Pagination};

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// A stored resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Tours,
    Users,
    Reviews,
    Bookings,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Tours,
        Collection::Users,
        Collection::Reviews,
        Collection::Bookings,
    ];

    /// Table name, also used in log fields.
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Tours => "tours",
            Collection::Users => "users",
            Collection::Reviews => "reviews",
            Collection::Bookings => "bookings",
        }
    }
}

/// A uniqueness constraint over one or more top-level fields.
#[derive(Debug)]
pub struct UniqueIndex {
    /// Index name in the Postgres schema.
    pub name: &'static str,
    pub collection: Collection,
    pub fields: &'static [&'static str],
}

pub const UNIQUE_INDEXES: &[UniqueIndex] = &[
    UniqueIndex {
        name: "tours_name_key",
        collection: Collection::Tours,
        fields: &["name"],
    },
    UniqueIndex {
        name: "users_email_key",
        collection: Collection::Users,
        fields: &["email"],
    },
    UniqueIndex {
        name: "reviews_tour_user_key",
        collection: Collection::Reviews,
        fields: &["tour", "user"],
    },
];

pub fn unique_indexes(collection: Collection) -> impl Iterator<Item = &'static UniqueIndex> {
    UNIQUE_INDEXES
        .iter()
        .filter(move |idx| idx.collection == collection)
}

impl UniqueIndex {
    /// The indexed values of a document, or None when any is missing.
    pub fn key(&self, doc: &Value) -> Option<Vec<Value>> {
        self.fields
            .iter()
            .map(|f| doc.get(*f).filter(|v| !v.is_null()).cloned())
            .collect()
    }

    /// Human-readable form of the indexed values for error messages.
    pub fn describe(&self, doc: &Value) -> String {
        self.fields
            .iter()
            .map(|f| match doc.get(*f) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn duplicate_error(&self, doc: &Value) -> StoreError {
        StoreError::Duplicate {
            fields: self.fields.iter().map(|f| (*f).to_string()).collect(),
            value: self.describe(doc),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate value for {fields:?}: {value}")]
    Duplicate { fields: Vec<String>, value: String },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Count and arithmetic mean of a numeric field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub count: u64,
    /// None when no documents matched.
    pub mean: Option<f64>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    async fn find(&self, collection: Collection, query: &FindQuery) -> StoreResult<Vec<Value>>;

    async fn count(&self, collection: Collection, filters: &[Filter]) -> StoreResult<u64>;

    /// Insert a document carrying `id` and `created_at`; returns the stored document.
    async fn insert(&self, collection: Collection, doc: Value) -> StoreResult<Value>;

    /// Merge top-level fields into a document and bump its version.
    /// Returns the updated document, or None when the id does not exist.
    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> StoreResult<Option<Value>>;

    /// Remove a document, returning it when it existed.
    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Value>>;

    async fn aggregate(
        &self,
        collection: Collection,
        filters: &[Filter],
        field: &str,
    ) -> StoreResult<Aggregate>;

    async fn health_check(&self) -> StoreResult<()>;

    async fn find_one(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
    ) -> StoreResult<Option<Value>> {
        let query = FindQuery::scoped(filters).paginate(Pagination::new(1, 1));
        Ok(self.find(collection, &query).await?.into_iter().next())
    }

    /// Look up by id within a scope (e.g. excluding inactive users).
    async fn find_by_id(
        &self,
        collection: Collection,
        id: Uuid,
        scope: &[Filter],
    ) -> StoreResult<Option<Value>> {
        let mut filters = scope.to_vec();
        filters.push(Filter::eq(ID_FIELD, id.to_string()));
        self.find_one(collection, filters).await
    }
}

/// The `id` of a document about to be stored.
pub fn document_id(doc: &Value) -> StoreResult<Uuid> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| StoreError::Unexpected(anyhow::anyhow!("document is missing a valid id")))
}

/// The `created_at` of a document about to be stored.
pub fn document_created_at(doc: &Value) -> StoreResult<DateTime<Utc>> {
    doc.get(CREATED_AT_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| {
            StoreError::Unexpected(anyhow::anyhow!("document is missing a valid created_at"))
        })
}

/// Drop keys a patch may never change.
pub fn sanitize_patch(mut patch: Map<String, Value>) -> Map<String, Value> {
    patch.remove(ID_FIELD);
    patch.remove(CREATED_AT_FIELD);
    patch
}
