//! Query Feature Builder.
//!
//! Refines a base [`FindQuery`] from raw query-string pairs through four
//! stages applied in order: filter, sort, field projection, pagination.
//!
//! Coercion policy for malformed input:
//! - `page` and `limit` that are not positive integers fall back to the
//!   defaults (1 and 100); `limit` is capped at [`MAX_LIMIT`].
//! - filter, sort and projection fields outside the resource allow-list are
//!   ignored, as are unknown `[op]` operators.
//! - repeated keys keep the last value, except the pollution whitelist whose
//!   repeated equality values become an any-of match.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde_json::{Number, Value};
use tracing::debug;

use super::{
    CREATED_AT_FIELD, Comparison, Filter, FindQuery, ID_FIELD, Pagination, Projection,
    SortDirection, SortKey,
};
use crate::error::AppError;

/// Control keys that never become filters.
pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// Fields allowed to repeat in a query string.
pub const POLLUTION_WHITELIST: [&str; 6] = [
    "price",
    "ratings_average",
    "ratings_quantity",
    "duration",
    "max_group_size",
    "difficulty",
];

/// Raw, ordered query-string pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// Last value for a key.
    pub fn last(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for a key, in order.
    pub fn all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Replace every value of `key` with a single value.
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.pairs.retain(|(k, _)| k != key);
        self.pairs.push((key.to_string(), value.to_string()));
        self
    }

    /// Distinct keys in order of first appearance.
    fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (k, _) in &self.pairs {
            if !keys.contains(&k.as_str()) {
                keys.push(k);
            }
        }
        keys
    }
}

impl<S: Send + Sync> FromRequestParts<S> for QueryParams {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::BadRequest(format!("Malformed query string: {e}")))?;
        Ok(Self::new(pairs))
    }
}

/// Four-stage refinement of a [`FindQuery`].
pub struct QueryFeatures<'a> {
    query: FindQuery,
    params: &'a QueryParams,
    fields: &'a [&'a str],
}

impl<'a> QueryFeatures<'a> {
    /// `fields` is the allow-list of document fields clients may query on.
    pub fn new(base: FindQuery, params: &'a QueryParams, fields: &'a [&'a str]) -> Self {
        Self {
            query: base,
            params,
            fields,
        }
    }

    /// Run every stage in order.
    pub fn apply(base: FindQuery, params: &'a QueryParams, fields: &'a [&'a str]) -> FindQuery {
        Self::new(base, params, fields)
            .filter()
            .sort()
            .limit_fields()
            .paginate()
            .into_query()
    }

    fn allowed(&self, field: &str) -> bool {
        field == ID_FIELD || field == CREATED_AT_FIELD || self.fields.contains(&field)
    }

    pub fn filter(mut self) -> Self {
        for key in self.params.keys() {
            if RESERVED_KEYS.contains(&key) {
                continue;
            }
            let Some((field, op)) = parse_filter_key(key) else {
                debug!(key, "ignoring filter with unknown operator");
                continue;
            };
            if !self.allowed(field) {
                debug!(field, "ignoring filter on unknown field");
                continue;
            }

            let values = self.params.all(key);
            let filter = match op {
                Comparison::In => {
                    let items = values
                        .iter()
                        .flat_map(|v| v.split(','))
                        .map(|v| coerce(v.trim()))
                        .collect();
                    Filter::new(field, Comparison::In, Value::Array(items))
                }
                Comparison::Eq if values.len() > 1 && POLLUTION_WHITELIST.contains(&field) => {
                    let items = values.iter().map(|v| coerce(v)).collect();
                    Filter::new(field, Comparison::In, Value::Array(items))
                }
                _ => {
                    let Some(last) = values.last() else {
                        continue;
                    };
                    Filter::new(field, op, coerce(last))
                }
            };
            self.query.filters.push(filter);
        }
        self
    }

    pub fn sort(mut self) -> Self {
        let mut keys = Vec::new();
        if let Some(raw) = self.params.last("sort") {
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (field, direction) = match part.strip_prefix('-') {
                    Some(field) => (field, SortDirection::Desc),
                    None => (part.trim_start_matches('+'), SortDirection::Asc),
                };
                if self.allowed(field) {
                    keys.push(SortKey {
                        field: field.to_string(),
                        direction,
                    });
                }
            }
        }
        if keys.is_empty() {
            keys.push(SortKey::desc(CREATED_AT_FIELD));
        }
        self.query.sort = keys;
        self
    }

    pub fn limit_fields(mut self) -> Self {
        let Some(raw) = self.params.last("fields") else {
            return self;
        };
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.strip_prefix('-') {
                Some(field) if self.allowed(field) => exclude.push(field.to_string()),
                None if self.allowed(part) => include.push(part.to_string()),
                _ => {}
            }
        }
        self.query.projection = if !include.is_empty() {
            Projection::Include(include)
        } else if !exclude.is_empty() {
            Projection::Exclude(exclude)
        } else {
            Projection::All
        };
        self
    }

    pub fn paginate(mut self) -> Self {
        let page = positive(self.params.last("page")).unwrap_or(DEFAULT_PAGE);
        let limit = positive(self.params.last("limit"))
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT);
        self.query.pagination = Some(Pagination::new(page, limit));
        self
    }

    pub fn into_query(self) -> FindQuery {
        self.query
    }
}

/// Split `price[gte]` into `("price", Gte)`; a bare key is equality.
fn parse_filter_key(key: &str) -> Option<(&str, Comparison)> {
    match key.split_once('[') {
        Some((field, rest)) => {
            let op = rest.strip_suffix(']')?;
            Some((field, Comparison::from_operator(op)?))
        }
        None => Some((key, Comparison::Eq)),
    }
}

fn positive(raw: Option<&str>) -> Option<u32> {
    raw?.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

/// Numbers become JSON numbers, `true`/`false` booleans, anything else a string.
pub fn coerce(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>()
        && let Some(n) = Number::from_f64(f)
    {
        return Value::Number(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
