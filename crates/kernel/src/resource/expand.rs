//! Reference expansion.
//!
//! Stored documents hold references as id strings (`guides`, `user`,
//! `tour`). Expansion replaces them with a projected copy of the referenced
//! document, or attaches child documents that point back at the parent
//! (`reviews` of a tour). Lookups are batched per expansion across the whole
//! result set.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::AppResult;
use crate::query::{Comparison, Filter, FindQuery, ID_FIELD, Projection, SortKey};
use crate::store::{Collection, DocumentStore};
use super::default_scope;

#[derive(Debug, Clone, Copy)]
pub struct Expansion {
    /// Field holding the reference, or receiving the children.
    pub path: &'static str,
    pub kind: ExpansionKind,
}

#[derive(Debug, Clone, Copy)]
pub enum ExpansionKind {
    /// `path` holds one id or an array of ids into `collection`.
    Reference {
        collection: Collection,
        fields: &'static [&'static str],
    },
    /// Documents in `collection` whose `foreign_field` equals the parent id.
    Children {
        collection: Collection,
        foreign_field: &'static str,
        fields: &'static [&'static str],
        nested: &'static [Expansion],
    },
}

impl Expansion {
    pub const fn reference(
        path: &'static str,
        collection: Collection,
        fields: &'static [&'static str],
    ) -> Self {
        Self {
            path,
            kind: ExpansionKind::Reference { collection, fields },
        }
    }

    pub const fn children(
        path: &'static str,
        collection: Collection,
        foreign_field: &'static str,
        fields: &'static [&'static str],
        nested: &'static [Expansion],
    ) -> Self {
        Self {
            path,
            kind: ExpansionKind::Children {
                collection,
                foreign_field,
                fields,
                nested,
            },
        }
    }
}

/// Expand every document in place.
pub async fn expand_many(
    store: &dyn DocumentStore,
    docs: &mut [Value],
    expansions: &[Expansion],
) -> AppResult<()> {
    for expansion in expansions {
        match expansion.kind {
            ExpansionKind::Reference { collection, fields } => {
                expand_reference(store, docs, expansion.path, collection, fields).await?;
            }
            ExpansionKind::Children {
                collection,
                foreign_field,
                fields,
                nested,
            } => {
                attach_children(
                    store,
                    docs,
                    expansion.path,
                    collection,
                    foreign_field,
                    fields,
                    nested,
                )
                .await?;
            }
        }
    }
    Ok(())
}

pub async fn expand_one(
    store: &dyn DocumentStore,
    doc: &mut Value,
    expansions: &[Expansion],
) -> AppResult<()> {
    expand_many(store, std::slice::from_mut(doc), expansions).await
}

async fn expand_reference(
    store: &dyn DocumentStore,
    docs: &mut [Value],
    path: &str,
    collection: Collection,
    fields: &[&str],
) -> AppResult<()> {
    let mut ids: Vec<String> = Vec::new();
    for doc in docs.iter() {
        for id in referenced_ids(doc.get(path)) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    if ids.is_empty() {
        return Ok(());
    }

    let targets = lookup(store, collection, ID_FIELD, ids, fields).await?;
    let by_id: HashMap<String, Value> = targets
        .into_iter()
        .filter_map(|t| Some((t.get(ID_FIELD)?.as_str()?.to_string(), t)))
        .collect();

    for doc in docs.iter_mut() {
        let Some(slot) = doc.get_mut(path) else {
            continue;
        };
        match slot {
            Value::String(id) => {
                *slot = by_id.get(id.as_str()).cloned().unwrap_or(Value::Null);
            }
            Value::Array(items) => {
                let expanded: Vec<Value> = items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|id| by_id.get(id).cloned())
                    .collect();
                *items = expanded;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn attach_children(
    store: &dyn DocumentStore,
    docs: &mut [Value],
    path: &str,
    collection: Collection,
    foreign_field: &str,
    fields: &[&str],
    nested: &[Expansion],
) -> AppResult<()> {
    let parent_ids: Vec<String> = docs
        .iter()
        .filter_map(|d| d.get(ID_FIELD)?.as_str().map(str::to_string))
        .collect();
    if parent_ids.is_empty() {
        return Ok(());
    }

    let mut wanted: Vec<&str> = fields.to_vec();
    if !wanted.contains(&foreign_field) {
        wanted.push(foreign_field);
    }
    let mut children = lookup(store, collection, foreign_field, parent_ids, &wanted).await?;
    for expansion in nested {
        // Nesting is one level deep: children expand their references only.
        if let ExpansionKind::Reference { collection, fields } = expansion.kind {
            expand_reference(store, &mut children, expansion.path, collection, fields).await?;
        }
    }

    let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
    for child in children {
        if let Some(parent) = child.get(foreign_field).and_then(Value::as_str) {
            grouped.entry(parent.to_string()).or_default().push(child);
        }
    }

    for doc in docs.iter_mut() {
        let id = doc
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        if let (Some(id), Some(object)) = (id, doc.as_object_mut()) {
            let list = grouped.remove(&id).unwrap_or_default();
            object.insert(path.to_string(), Value::Array(list));
        }
    }
    Ok(())
}

async fn lookup(
    store: &dyn DocumentStore,
    collection: Collection,
    key: &str,
    values: Vec<String>,
    fields: &[&str],
) -> AppResult<Vec<Value>> {
    let values: Vec<Value> = values.into_iter().map(Value::String).collect();
    let query = FindQuery::scoped(default_scope(collection))
        .filter(Filter::new(key, Comparison::In, Value::Array(values)))
        .sort_by(SortKey::asc(crate::query::CREATED_AT_FIELD))
        .project(Projection::Include(
            fields.iter().map(|f| f.to_string()).collect(),
        ));
    let mut found = store.find(collection, &query).await?;
    // Hidden fields of the target may still be named; never leak them.
    for doc in &mut found {
        if let Some(object) = doc.as_object_mut() {
            strip_secrets(object);
        }
    }
    Ok(found)
}

fn strip_secrets(object: &mut Map<String, Value>) {
    for key in [
        "password",
        "password_changed_at",
        "password_reset_token",
        "password_reset_expires",
    ] {
        object.remove(key);
    }
}

fn referenced_ids(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(id)) => vec![id.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
