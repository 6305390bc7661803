//! Tour rating aggregation.
//!
//! A tour's `ratings_average` and `ratings_quantity` cache the mean and count
//! of its reviews and are rebuilt after every review write.

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::tour::{DEFAULT_RATINGS_AVERAGE, round_rating};
use crate::query::Filter;
use crate::store::{Aggregate, Collection, DocumentStore};

/// Average and count to store for an aggregate; no reviews resets to the default.
pub fn summarize(aggregate: &Aggregate) -> (f64, u64) {
    match aggregate.mean {
        Some(mean) if aggregate.count > 0 => (round_rating(mean), aggregate.count),
        _ => (DEFAULT_RATINGS_AVERAGE, 0),
    }
}

/// Recompute and store the rating of one tour.
pub async fn recalculate(store: &dyn DocumentStore, tour_id: Uuid) -> AppResult<(f64, u64)> {
    let aggregate = store
        .aggregate(
            Collection::Reviews,
            &[Filter::eq("tour", tour_id.to_string())],
            "rating",
        )
        .await?;
    let (average, quantity) = summarize(&aggregate);

    let mut patch = Map::new();
    patch.insert("ratings_average".to_string(), Value::from(average));
    patch.insert("ratings_quantity".to_string(), Value::from(quantity));
    if store.update(Collection::Tours, tour_id, patch).await?.is_none() {
        debug!(tour = %tour_id, "rating recomputed for a missing tour");
    }
    Ok((average, quantity))
}
