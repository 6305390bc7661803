//! In-memory implementation of the document store.
//!
//! Collections are vectors of documents in insertion order, guarded by a
//! single `tokio::sync::RwLock`. Reads share the lock; writes serialize.
//! Not durable: all state is lost on restart. Used when no database is
//! configured and by the HTTP tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Aggregate, Collection, DocumentStore, StoreResult, document_created_at, document_id,
    sanitize_patch, unique_indexes,
};
use crate::query::{Filter, FindQuery, eval};

#[derive(Debug, Clone)]
struct StoredDocument {
    id: Uuid,
    version: u64,
    doc: Value,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<Collection, Vec<StoredDocument>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of a document; starts at 0 and increments per update.
    pub async fn version(&self, collection: Collection, id: Uuid) -> Option<u64> {
        let collections = self.collections.read().await;
        collections
            .get(&collection)?
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.version)
    }
}

fn check_unique(
    collection: Collection,
    docs: &[StoredDocument],
    candidate: &Value,
    id: Uuid,
) -> StoreResult<()> {
    for index in unique_indexes(collection) {
        let Some(key) = index.key(candidate) else {
            continue;
        };
        let clash = docs
            .iter()
            .any(|d| d.id != id && index.key(&d.doc).as_ref() == Some(&key));
        if clash {
            return Err(index.duplicate_error(candidate));
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find(&self, collection: Collection, query: &FindQuery) -> StoreResult<Vec<Value>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&collection) else {
            return Ok(Vec::new());
        };
        Ok(eval::apply(docs.iter().map(|d| &d.doc), query))
    }

    async fn count(&self, collection: Collection, filters: &[Filter]) -> StoreResult<u64> {
        let collections = self.collections.read().await;
        let count = collections.get(&collection).map_or(0, |docs| {
            docs.iter()
                .filter(|d| eval::matches_all(&d.doc, filters))
                .count()
        });
        Ok(count as u64)
    }

    async fn insert(&self, collection: Collection, doc: Value) -> StoreResult<Value> {
        let id = document_id(&doc)?;
        document_created_at(&doc)?;

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();
        check_unique(collection, docs, &doc, id)?;
        docs.push(StoredDocument {
            id,
            version: 0,
            doc: doc.clone(),
        });
        Ok(doc)
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> StoreResult<Option<Value>> {
        let patch = sanitize_patch(patch);
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(None);
        };
        let Some(position) = docs.iter().position(|d| d.id == id) else {
            return Ok(None);
        };

        let mut merged = docs[position].doc.clone();
        if let Some(object) = merged.as_object_mut() {
            object.extend(patch);
        }
        check_unique(collection, docs, &merged, id)?;

        let stored = &mut docs[position];
        stored.doc = merged.clone();
        stored.version += 1;
        Ok(Some(merged))
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Value>> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(None);
        };
        let removed = docs
            .iter()
            .position(|d| d.id == id)
            .map(|position| docs.remove(position).doc);
        Ok(removed)
    }

    async fn aggregate(
        &self,
        collection: Collection,
        filters: &[Filter],
        field: &str,
    ) -> StoreResult<Aggregate> {
        let collections = self.collections.read().await;
        let matching: Vec<&Value> = collections
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| eval::matches_all(&d.doc, filters))
                    .map(|d| &d.doc)
                    .collect()
            })
            .unwrap_or_default();

        let values: Vec<f64> = matching
            .iter()
            .filter_map(|doc| doc.get(field).and_then(Value::as_f64))
            .collect();
        let count = matching.len() as u64;
        let mean = if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };
        Ok(Aggregate { count, mean })
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
