//! Query shapes: filters, sorting, projection and pagination.
//!
//! [`FindQuery`] is the store-neutral query handle. It is refined from raw
//! query-string pairs by [`QueryFeatures`], executed as SQL by the Postgres
//! store via [`sql`], and evaluated directly by the in-memory store via [`eval`].

pub mod eval;
pub mod features;
pub mod sql;

use serde_json::Value;

pub use features::{QueryFeatures, QueryParams};

/// Document fields stored as real columns rather than inside the document.
pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "created_at";

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Matches when the field equals any element of an array value.
    In,
}

impl Comparison {
    /// Parse the bracketed operator of `field[op]=value`.
    pub fn from_operator(op: &str) -> Option<Self> {
        match op {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "ne" => Some(Self::Ne),
            "eq" => Some(Self::Eq),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    pub fn sql_operator(&self) -> &'static str {
        match self {
            Self::Eq | Self::In => "=",
            Self::Ne => "IS DISTINCT FROM",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// A single predicate on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: Comparison,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Comparison::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Comparison::Ne, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Which fields of a document are returned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    /// Only these fields, plus `id`.
    Include(Vec<String>),
    /// Everything except these fields.
    Exclude(Vec<String>),
}

/// Page/limit pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit,
        }
    }

    /// Number of documents to skip: `(page - 1) * limit`.
    pub fn skip(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// Store-neutral query handle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindQuery {
    /// All filters must match.
    pub filters: Vec<Filter>,
    /// Empty means insertion (id) order.
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub pagination: Option<Pagination>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a set of scoping filters.
    pub fn scoped(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Sort keys with the `id` tiebreaker appended.
    pub fn effective_sort(&self) -> Vec<SortKey> {
        let mut keys = self.sort.clone();
        if !keys.iter().any(|k| k.field == ID_FIELD) {
            keys.push(SortKey::asc(ID_FIELD));
        }
        keys
    }
}
