//! SQL generation for [`FindQuery`] using SeaQuery.
//!
//! Each collection is a table `(id UUID, created_at TIMESTAMPTZ, version INT, doc JSONB)`.
//! `id` and `created_at` are filtered and sorted on their columns; every other
//! field is addressed inside `doc` and compared as `jsonb`.

use chrono::{DateTime, NaiveDate};
use sea_query::{
    Alias, Asterisk, Cond, Expr, Order, PostgresQueryBuilder, Query, SelectStatement,
    SimpleExpr,
};
use serde_json::Value;
use uuid::Uuid;

use super::{CREATED_AT_FIELD, Comparison, Filter, FindQuery, ID_FIELD, Projection, SortDirection};

/// Builds SELECT statements for one collection table.
pub struct SqlQueryBuilder<'a> {
    table: &'a str,
    query: &'a FindQuery,
}

impl<'a> SqlQueryBuilder<'a> {
    pub fn new(table: &'a str, query: &'a FindQuery) -> Self {
        Self { table, query }
    }

    /// Build the main SELECT returning one `doc` column per row.
    pub fn build(&self) -> String {
        let mut select = Query::select();
        select
            .expr_as(self.projection_expr(), Alias::new("doc"))
            .from(Alias::new(self.table));
        self.add_filters(&mut select);
        self.add_sorts(&mut select);

        if let Some(page) = self.query.pagination {
            select.limit(u64::from(page.limit));
            select.offset(page.skip());
        }

        select.to_string(PostgresQueryBuilder)
    }

    /// Build a COUNT query over the same filters.
    pub fn build_count(&self) -> String {
        let mut select = Query::select();
        select
            .expr(Expr::col(Asterisk).count())
            .from(Alias::new(self.table));
        self.add_filters(&mut select);
        select.to_string(PostgresQueryBuilder)
    }

    /// Build `SELECT COUNT(*), AVG(field)` over the same filters.
    pub fn build_aggregate(&self, field: &str) -> String {
        let mut select = Query::select();
        select
            .expr_as(Expr::col(Asterisk).count(), Alias::new("count"))
            .expr_as(
                Expr::cust_with_values(
                    format!("AVG(({}.doc ->> $1)::float8)", self.table),
                    [field.to_string()],
                ),
                Alias::new("mean"),
            )
            .from(Alias::new(self.table));
        self.add_filters(&mut select);
        select.to_string(PostgresQueryBuilder)
    }

    fn projection_expr(&self) -> SimpleExpr {
        let table = self.table;
        match &self.query.projection {
            Projection::All => Expr::cust(format!("{table}.doc")),
            Projection::Include(fields) => {
                let mut keep = vec![ID_FIELD.to_string()];
                keep.extend(fields.iter().cloned());
                Expr::cust_with_values(
                    format!(
                        "{table}.doc - ARRAY(SELECT k FROM jsonb_object_keys({table}.doc) AS k \
                         WHERE k <> ALL($1::text[]))"
                    ),
                    [text_array(&keep)],
                )
            }
            Projection::Exclude(fields) => {
                let drop: Vec<String> = fields
                    .iter()
                    .filter(|f| f.as_str() != ID_FIELD)
                    .cloned()
                    .collect();
                Expr::cust_with_values(format!("{table}.doc - $1::text[]"), [text_array(&drop)])
            }
        }
    }

    fn add_filters(&self, select: &mut SelectStatement) {
        for filter in &self.query.filters {
            select.and_where(filter_condition(self.table, filter));
        }
    }

    fn add_sorts(&self, select: &mut SelectStatement) {
        for key in self.query.effective_sort() {
            let order = match key.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            if key.field == ID_FIELD || key.field == CREATED_AT_FIELD {
                select.order_by((Alias::new(self.table), Alias::new(&key.field)), order);
            } else {
                select.order_by_expr(
                    Expr::cust_with_values(format!("{}.doc -> $1", self.table), [key.field]),
                    order,
                );
            }
        }
    }
}

/// Build the WHERE condition for one filter.
pub fn filter_condition(table: &str, filter: &Filter) -> SimpleExpr {
    match filter.field.as_str() {
        ID_FIELD => column_condition(table, ID_FIELD, "uuid", filter, |v| {
            Uuid::parse_str(v).is_ok()
        }),
        CREATED_AT_FIELD => column_condition(table, CREATED_AT_FIELD, "timestamptz", filter, |v| {
            DateTime::parse_from_rfc3339(v).is_ok()
                || NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok()
        }),
        field => jsonb_condition(table, field, filter),
    }
}

fn jsonb_condition(table: &str, field: &str, filter: &Filter) -> SimpleExpr {
    match filter.op {
        Comparison::In => {
            let items = match &filter.value {
                Value::Array(_) => filter.value.to_string(),
                other => Value::Array(vec![other.clone()]).to_string(),
            };
            Expr::cust_with_values(
                format!("$1::jsonb @> jsonb_build_array({table}.doc -> $2)"),
                [items, field.to_string()],
            )
        }
        op => Expr::cust_with_values(
            format!("{table}.doc -> $1 {} $2::jsonb", op.sql_operator()),
            [field.to_string(), filter.value.to_string()],
        ),
    }
}

/// Conditions on real columns; values that cannot be cast never match.
fn column_condition(
    table: &str,
    column: &str,
    cast: &str,
    filter: &Filter,
    valid: impl Fn(&str) -> bool,
) -> SimpleExpr {
    let scalar = |value: &Value| -> Option<String> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        valid(&text).then_some(text)
    };

    match filter.op {
        Comparison::In => {
            let Some(items) = filter.value.as_array() else {
                return Expr::cust("FALSE");
            };
            let mut cond = Cond::any();
            for text in items.iter().filter_map(scalar) {
                cond = cond.add(Expr::cust_with_values(
                    format!("{table}.{column} = $1::{cast}"),
                    [text],
                ));
            }
            if cond.is_empty() {
                Expr::cust("FALSE")
            } else {
                cond.into()
            }
        }
        op => match scalar(&filter.value) {
            Some(text) => Expr::cust_with_values(
                format!("{table}.{column} {} $1::{cast}", op.sql_operator()),
                [text],
            ),
            None if op == Comparison::Ne => Expr::cust("TRUE"),
            None => Expr::cust("FALSE"),
        },
    }
}

/// Postgres text array literal, e.g. `{"id","name"}`.
fn text_array(items: &[String]) -> String {
    let quoted: Vec<String> = items
        .iter()
        .map(|s| format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", quoted.join(","))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::{Pagination, SortKey};
    use serde_json::json;

    #[test]
    fn simple_query_build() {
        let query = FindQuery::new();
        let sql = SqlQueryBuilder::new("tours", &query).build();
        assert!(sql.contains("SELECT tours.doc AS \"doc\""));
        assert!(sql.contains("FROM \"tours\""));
        assert!(sql.contains("ORDER BY \"tours\".\"id\" ASC"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn pagination_offset() {
        let query = FindQuery::new().paginate(Pagination::new(3, 10));
        let sql = SqlQueryBuilder::new("tours", &query).build();
        assert!(sql.contains("LIMIT 10"));
        assert!(sql.contains("OFFSET 20"));
    }

    #[test]
    fn jsonb_comparisons() {
        let query = FindQuery::new()
            .filter(Filter::new("price", Comparison::Gte, 100))
            .filter(Filter::new("price", Comparison::Lte, 500))
            .filter(Filter::eq("difficulty", "easy"));
        let sql = SqlQueryBuilder::new("tours", &query).build();
        assert!(sql.contains("tours.doc -> 'price' >= '100'::jsonb"));
        assert!(sql.contains("tours.doc -> 'price' <= '500'::jsonb"));
        assert!(sql.contains("tours.doc -> 'difficulty' = '\"easy\"'::jsonb"));
    }

    #[test]
    fn not_equal_treats_missing_as_distinct() {
        let query = FindQuery::new().filter(Filter::ne("secret_tour", true));
        let sql = SqlQueryBuilder::new("tours", &query).build();
        assert!(sql.contains("tours.doc -> 'secret_tour' IS DISTINCT FROM 'true'::jsonb"));
    }

    #[test]
    fn any_of_uses_containment() {
        let query = FindQuery::new().filter(Filter::new("duration", Comparison::In, json!([5, 9])));
        let sql = SqlQueryBuilder::new("tours", &query).build();
        assert!(sql.contains("'[5,9]'::jsonb @> jsonb_build_array(tours.doc -> 'duration')"));
    }

    #[test]
    fn id_filter_uses_column_and_rejects_garbage() {
        let id = Uuid::now_v7();
        let query = FindQuery::new().filter(Filter::eq("id", id.to_string()));
        let sql = SqlQueryBuilder::new("users", &query).build();
        assert!(sql.contains(&format!("users.id = '{id}'::uuid")));

        let query = FindQuery::new().filter(Filter::eq("id", "not-a-uuid"));
        let sql = SqlQueryBuilder::new("users", &query).build();
        assert!(sql.contains("WHERE FALSE"));
    }

    #[test]
    fn sorts_on_document_and_columns() {
        let query = FindQuery::new()
            .sort_by(SortKey::desc("price"))
            .sort_by(SortKey::desc("created_at"));
        let sql = SqlQueryBuilder::new("tours", &query).build();
        assert!(sql.contains(concat!(
            "ORDER BY tours.doc -> 'price' DESC, ",
            "\"tours\".\"created_at\" DESC, \"tours\".\"id\" ASC"
        )));
    }

    #[test]
    fn projections() {
        let query = FindQuery::new().project(Projection::Include(vec!["name".into()]));
        let sql = SqlQueryBuilder::new("tours", &query).build();
        assert!(sql.contains("k <> ALL('{\"id\",\"name\"}'::text[])"));

        let query = FindQuery::new().project(Projection::Exclude(vec!["price".into()]));
        let sql = SqlQueryBuilder::new("tours", &query).build();
        assert!(sql.contains("tours.doc - '{\"price\"}'::text[]"));
    }

    #[test]
    fn count_and_aggregate() {
        let query = FindQuery::new().filter(Filter::eq("tour", "abc"));
        let builder = SqlQueryBuilder::new("reviews", &query);
        let count = builder.build_count();
        assert!(count.contains("COUNT(*)"));
        assert!(count.contains("reviews.doc -> 'tour' = '\"abc\"'::jsonb"));

        let agg = builder.build_aggregate("rating");
        assert!(agg.contains("AVG((reviews.doc ->> 'rating')::float8)"));
    }
}
