//! Generic resource engine.
//!
//! One engine serves every resource kind. A [`Resource`] describes its
//! collection, query allow-list, hidden fields, scope and expansions, and
//! supplies the named write-pipeline stages the handlers run in order:
//!
//! 1. `validate_create` / `validate_update` build a checked document or patch
//! 2. `prepare_create` derives stored values (password hashes)
//! 3. the store persists the change
//! 4. `after_write` reacts to the committed change (rating aggregation)
//! 5. `present` strips hidden fields and adds computed ones for the response

pub mod expand;
pub mod fields;
pub mod handlers;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult, FieldError};
use crate::query::Filter;
use crate::state::AppState;
use crate::store::Collection;

pub use expand::Expansion;
pub use fields::Fields;

/// A committed change, handed to [`Resource::after_write`].
#[derive(Debug)]
pub enum WriteEvent<'a, R> {
    Created(&'a R),
    Updated { before: &'a R, after: &'a R },
    Deleted(&'a R),
}

#[async_trait]
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Singular name used in response envelopes ("tour").
    const NAME: &'static str;
    /// Plural name used for list envelopes ("tours").
    const PLURAL: &'static str;
    const COLLECTION: Collection;
    /// Document fields clients may filter, sort and project on.
    const QUERY_FIELDS: &'static [&'static str];
    /// Stored fields never returned to clients.
    const HIDDEN_FIELDS: &'static [&'static str] = &[];
    /// Expansions applied when reading one document.
    const EXPAND_ONE: &'static [Expansion] = &[];
    /// Expansions applied to every document of a listing.
    const EXPAND_MANY: &'static [Expansion] = &[];
    /// When set, delete marks this boolean field false instead of removing.
    const SOFT_DELETE_FIELD: Option<&'static str> = None;

    fn id(&self) -> Uuid;

    /// Filters every default query applies.
    fn default_scope() -> Vec<Filter> {
        default_scope(Self::COLLECTION)
    }

    fn validate_create(input: &Map<String, Value>) -> Result<Self, Vec<FieldError>>;

    /// Validate only the supplied fields and return the patch to store.
    fn validate_update(
        input: &Map<String, Value>,
        current: &Self,
    ) -> Result<Map<String, Value>, Vec<FieldError>>;

    async fn prepare_create(self, _state: &AppState) -> AppResult<Self> {
        Ok(self)
    }

    async fn after_write(_state: &AppState, _event: WriteEvent<'_, Self>) -> AppResult<()> {
        Ok(())
    }

    /// Add read-time computed fields.
    fn present(_doc: &mut Map<String, Value>) {}
}

/// Default scope of a collection, shared by resources and expansions.
pub fn default_scope(collection: Collection) -> Vec<Filter> {
    match collection {
        Collection::Tours => vec![Filter::ne("secret_tour", true)],
        Collection::Users => vec![Filter::ne("active", false)],
        Collection::Reviews | Collection::Bookings => Vec::new(),
    }
}

/// Serialize a model into a storable document.
pub fn to_document<R: Resource>(model: &R) -> AppResult<Value> {
    serde_json::to_value(model)
        .with_context(|| format!("failed to serialize {}", R::NAME))
        .map_err(AppError::from)
}

/// Deserialize a stored document into its model.
pub fn from_document<R: Resource>(doc: Value) -> AppResult<R> {
    serde_json::from_value(doc)
        .with_context(|| format!("stored {} document is malformed", R::NAME))
        .map_err(AppError::from)
}

/// Remove hidden fields and add computed ones.
pub fn present<R: Resource>(mut doc: Value) -> Value {
    if let Some(object) = doc.as_object_mut() {
        for field in R::HIDDEN_FIELDS {
            object.remove(*field);
        }
        R::present(object);
    }
    doc
}

/// Parse a path identifier, reporting malformed ids as a client error.
pub fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::InvalidId {
        field: "id".to_string(),
        value: raw.to_string(),
    })
}

pub fn not_found<R: Resource>() -> AppError {
    AppError::not_found(format!("No {} found with that ID", R::NAME))
}

/// Serialize a validated value for a patch.
pub fn patch_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
