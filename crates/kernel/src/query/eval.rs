//! In-process evaluation of a [`FindQuery`] over JSON documents.
//!
//! Mirrors the SQL produced by [`super::sql`]: numeric comparison for numbers,
//! chronological comparison for RFC 3339 timestamps, and missing fields
//! sorting after every present value in ascending order.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

use super::{Comparison, Filter, FindQuery, ID_FIELD, Projection, SortDirection, SortKey};

/// True when the document satisfies the filter.
pub fn matches(doc: &Value, filter: &Filter) -> bool {
    let actual = doc.get(&filter.field).unwrap_or(&Value::Null);
    match filter.op {
        Comparison::Eq => values_equal(actual, &filter.value),
        Comparison::Ne => !values_equal(actual, &filter.value),
        Comparison::In => filter
            .value
            .as_array()
            .is_some_and(|items| items.iter().any(|v| values_equal(actual, v))),
        Comparison::Gt => compare_values(actual, &filter.value) == Some(Ordering::Greater),
        Comparison::Gte => matches!(
            compare_values(actual, &filter.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Comparison::Lt => compare_values(actual, &filter.value) == Some(Ordering::Less),
        Comparison::Lte => matches!(
            compare_values(actual, &filter.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}

pub fn matches_all(doc: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches(doc, f))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn as_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

/// Ordering between two values of the same kind; None when not comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (as_timestamp(x), as_timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        Some(Value::Null) => 0,
        Some(Value::String(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::Bool(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
        None => 6,
    }
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    if let (Some(x), Some(y)) = (a, b)
        && let Some(ord) = compare_values(x, y)
    {
        return ord;
    }
    type_rank(a).cmp(&type_rank(b))
}

/// Compare two documents by a list of sort keys.
pub fn compare_docs(a: &Value, b: &Value, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = compare_field(a.get(&key.field), b.get(&key.field));
        let ord = match key.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Apply a projection to one document.
pub fn project(doc: &Value, projection: &Projection) -> Value {
    let Some(object) = doc.as_object() else {
        return doc.clone();
    };
    match projection {
        Projection::All => doc.clone(),
        Projection::Include(fields) => {
            let mut out = Map::new();
            for (key, value) in object {
                if key == ID_FIELD || fields.iter().any(|f| f == key) {
                    out.insert(key.clone(), value.clone());
                }
            }
            Value::Object(out)
        }
        Projection::Exclude(fields) => {
            let mut out = object.clone();
            for field in fields {
                if field != ID_FIELD {
                    out.remove(field);
                }
            }
            Value::Object(out)
        }
    }
}

/// Run a whole query over a set of documents.
pub fn apply<'a>(docs: impl IntoIterator<Item = &'a Value>, query: &FindQuery) -> Vec<Value> {
    let mut selected: Vec<&Value> = docs
        .into_iter()
        .filter(|doc| matches_all(doc, &query.filters))
        .collect();

    let keys = query.effective_sort();
    selected.sort_by(|a, b| compare_docs(a, b, &keys));

    let (skip, take) = match query.pagination {
        Some(page) => (
            usize::try_from(page.skip()).unwrap_or(usize::MAX),
            page.limit as usize,
        ),
        None => (0, usize::MAX),
    };

    selected
        .into_iter()
        .skip(skip)
        .take(take)
        .map(|doc| project(doc, &query.projection))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::Pagination;
    use serde_json::json;

    fn tour(id: &str, name: &str, price: u32, created_at: &str) -> Value {
        json!({"id": id, "name": name, "price": price, "created_at": created_at})
    }

    fn tours() -> Vec<Value> {
        vec![
            tour("01", "Alpha", 397, "2024-01-01T00:00:00Z"),
            tour("02", "Bravo", 997, "2024-01-02T00:00:00.5Z"),
            tour("03", "Charlie", 497, "2024-01-02T00:00:00Z"),
            tour("04", "Delta", 997, "2024-01-03T00:00:00Z"),
            json!({"id": "05", "name": "Echo", "created_at": "2024-01-04T00:00:00Z"}),
        ]
    }

    fn names(docs: &[Value]) -> Vec<&str> {
        docs.iter().map(|d| d["name"].as_str().unwrap()).collect()
    }

    #[test]
    fn range_filter_is_inclusive() {
        let docs = tours();
        let query = FindQuery::new()
            .filter(Filter::new("price", Comparison::Gte, 397))
            .filter(Filter::new("price", Comparison::Lte, 497));
        assert_eq!(names(&apply(&docs, &query)), vec!["Alpha", "Charlie"]);
    }

    #[test]
    fn sort_desc_with_secondary_key() {
        let docs = tours();
        let query = FindQuery::new()
            .sort_by(SortKey::desc("price"))
            .sort_by(SortKey::asc("name"));
        // Echo has no price and sorts first when descending
        assert_eq!(
            names(&apply(&docs, &query)),
            vec!["Echo", "Bravo", "Delta", "Charlie", "Alpha"]
        );
    }

    #[test]
    fn timestamps_compare_chronologically() {
        let docs = tours();
        let query = FindQuery::new().sort_by(SortKey::asc("created_at"));
        assert_eq!(
            names(&apply(&docs, &query)),
            vec!["Alpha", "Charlie", "Bravo", "Delta", "Echo"]
        );
    }

    #[test]
    fn pagination_and_past_the_end() {
        let docs = tours();
        let query = FindQuery::new().paginate(Pagination::new(2, 2));
        assert_eq!(names(&apply(&docs, &query)), vec!["Charlie", "Delta"]);

        let query = FindQuery::new().paginate(Pagination::new(9, 2));
        assert!(apply(&docs, &query).is_empty());
    }

    #[test]
    fn in_and_ne_filters() {
        let docs = tours();
        let any_of = Filter::new("price", Comparison::In, json!([397, 997]));
        let query = FindQuery::new().filter(any_of);
        assert_eq!(names(&apply(&docs, &query)), vec!["Alpha", "Bravo", "Delta"]);

        let query = FindQuery::new().filter(Filter::ne("price", 997));
        assert_eq!(names(&apply(&docs, &query)), vec!["Alpha", "Charlie", "Echo"]);
    }

    #[test]
    fn projection_keeps_id() {
        let doc = json!({"id": "1", "name": "x", "price": 1});
        assert_eq!(
            project(&doc, &Projection::Include(vec!["price".into()])),
            json!({"id": "1", "price": 1})
        );
        assert_eq!(
            project(&doc, &Projection::Exclude(vec!["price".into(), "id".into()])),
            json!({"id": "1", "name": "x"})
        );
    }
}
