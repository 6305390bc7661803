//! Generic CRUD over any [`Resource`].
//!
//! The `create`/`find_one`/`find_many`/`update`/`delete` functions hold the
//! behavior and are reused by resource-specific routes (nested reviews,
//! `/users/me`). The `*_one`/`get_all` functions are the axum handlers a
//! router mounts with a turbofish, e.g. `get(get_all::<Tour>)`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Map, Value, json};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::sanitize::ApiJson;
use crate::query::{Filter, FindQuery, QueryFeatures, QueryParams};
use crate::state::AppState;
use crate::store::sanitize_patch;
use super::expand::{expand_many, expand_one};
use super::{Resource, WriteEvent, from_document, not_found, parse_id, present, to_document};

/// One page of a listing plus the number of documents matching its filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub results: Vec<Value>,
    pub total: u64,
}

/// Validate, prepare, store and react to a new document.
pub async fn create<R: Resource>(state: &AppState, input: &Map<String, Value>) -> AppResult<R> {
    let model = R::validate_create(input).map_err(AppError::Validation)?;
    let model = model.prepare_create(state).await?;
    let stored = state
        .store()
        .insert(R::COLLECTION, to_document(&model)?)
        .await?;
    let model: R = from_document(stored)?;
    info!(resource = R::NAME, id = %model.id(), "document created");
    R::after_write(state, WriteEvent::Created(&model)).await?;
    Ok(model)
}

/// Typed lookup within the default scope.
pub async fn fetch<R: Resource>(state: &AppState, id: Uuid) -> AppResult<R> {
    let doc = state
        .store()
        .find_by_id(R::COLLECTION, id, &R::default_scope())
        .await?
        .ok_or_else(not_found::<R>)?;
    from_document(doc)
}

/// One presented document with its read-one expansions.
pub async fn find_one<R: Resource>(
    state: &AppState,
    id: Uuid,
    extra_scope: &[Filter],
) -> AppResult<Value> {
    let mut scope = R::default_scope();
    scope.extend_from_slice(extra_scope);
    let mut doc = state
        .store()
        .find_by_id(R::COLLECTION, id, &scope)
        .await?
        .ok_or_else(not_found::<R>)?;
    expand_one(state.store().as_ref(), &mut doc, R::EXPAND_ONE).await?;
    Ok(present::<R>(doc))
}

/// A refined, paginated listing.
pub async fn find_many<R: Resource>(
    state: &AppState,
    extra_scope: Vec<Filter>,
    params: &QueryParams,
) -> AppResult<Listing> {
    let mut scope = R::default_scope();
    scope.extend(extra_scope);
    let query = QueryFeatures::apply(FindQuery::scoped(scope), params, R::QUERY_FIELDS);

    let store = state.store();
    let total = store.count(R::COLLECTION, &query.filters).await?;
    let mut results = store.find(R::COLLECTION, &query).await?;
    expand_many(store.as_ref(), &mut results, R::EXPAND_MANY).await?;
    let results = results.into_iter().map(present::<R>).collect();
    Ok(Listing { results, total })
}

/// Apply a validated partial update; returns the presented document.
pub async fn update<R: Resource>(
    state: &AppState,
    id: Uuid,
    input: &Map<String, Value>,
) -> AppResult<Value> {
    let before: R = fetch(state, id).await?;
    let patch = R::validate_update(input, &before).map_err(AppError::Validation)?;
    let patch = sanitize_patch(patch);
    if patch.is_empty() {
        return Ok(present::<R>(to_document(&before)?));
    }

    let updated = state
        .store()
        .update(R::COLLECTION, id, patch)
        .await?
        .ok_or_else(not_found::<R>)?;
    let after: R = from_document(updated.clone())?;
    info!(resource = R::NAME, %id, "document updated");
    R::after_write(
        state,
        WriteEvent::Updated {
            before: &before,
            after: &after,
        },
    )
    .await?;
    Ok(present::<R>(updated))
}

/// Remove a document, or deactivate it for soft-deleting resources.
pub async fn delete<R: Resource>(state: &AppState, id: Uuid) -> AppResult<()> {
    let current: R = fetch(state, id).await?;
    match R::SOFT_DELETE_FIELD {
        Some(field) => {
            let mut patch = Map::new();
            patch.insert(field.to_string(), Value::Bool(false));
            state
                .store()
                .update(R::COLLECTION, id, patch)
                .await?
                .ok_or_else(not_found::<R>)?;
            info!(resource = R::NAME, %id, "document deactivated");
        }
        None => {
            state
                .store()
                .delete(R::COLLECTION, id)
                .await?
                .ok_or_else(not_found::<R>)?;
            info!(resource = R::NAME, %id, "document deleted");
        }
    }
    R::after_write(state, WriteEvent::Deleted(&current)).await
}

/// `{"status": "success", "data": {"<name>": doc}}`
pub fn envelope<R: Resource>(doc: Value) -> Json<Value> {
    let mut data = Map::new();
    data.insert(R::NAME.to_string(), doc);
    Json(json!({ "status": "success", "data": data }))
}

/// `{"status": "success", "results": n, "total": t, "data": {"<plural>": [...]}}`
pub fn listing_envelope<R: Resource>(listing: Listing) -> Json<Value> {
    let mut data = Map::new();
    let results = listing.results.len();
    data.insert(R::PLURAL.to_string(), Value::Array(listing.results));
    Json(json!({
        "status": "success",
        "results": results,
        "total": listing.total,
        "data": data,
    }))
}

pub async fn get_all<R: Resource>(
    State(state): State<AppState>,
    params: QueryParams,
) -> AppResult<Json<Value>> {
    let listing = find_many::<R>(&state, Vec::new(), &params).await?;
    Ok(listing_envelope::<R>(listing))
}

pub async fn get_one<R: Resource>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let doc = find_one::<R>(&state, parse_id(&id)?, &[]).await?;
    Ok(envelope::<R>(doc))
}

pub async fn create_one<R: Resource>(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Map<String, Value>>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let model = create::<R>(&state, &body).await?;
    let doc = present::<R>(to_document(&model)?);
    Ok((StatusCode::CREATED, envelope::<R>(doc)))
}

pub async fn update_one<R: Resource>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<Map<String, Value>>,
) -> AppResult<Json<Value>> {
    let doc = update::<R>(&state, parse_id(&id)?, &body).await?;
    Ok(envelope::<R>(doc))
}

pub async fn delete_one<R: Resource>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    delete::<R>(&state, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
