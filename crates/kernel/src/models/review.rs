//! Review model.
//!
//! Every committed review change recomputes the parent tour's rating.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AppResult, FieldError};
use crate::resource::{Expansion, Fields, Resource, WriteEvent};
use crate::services::ratings;
use crate::state::AppState;
use crate::store::Collection;

pub const MIN_RATING: f64 = 1.0;
pub const MAX_RATING: f64 = 5.0;

const AUTHOR: &[Expansion] = &[Expansion::reference(
    "user",
    Collection::Users,
    &["name", "photo"],
)];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    pub tour: Uuid,
    pub user: Uuid,
    pub created_at: DateTime<Utc>,
}

fn read_text(fields: &mut Fields<'_>, creating: bool) -> Option<String> {
    let review = fields
        .field::<String>("review", creating, "Review can not be empty!")
        .map(|r| r.trim().to_string());
    fields.check(
        "review",
        review.as_deref().is_none_or(|r| !r.is_empty()),
        "Review can not be empty!",
    );
    review
}

fn read_rating(fields: &mut Fields<'_>, creating: bool) -> Option<f64> {
    let rating = fields.field::<f64>("rating", creating, "A review must have a rating");
    if let Some(rating) = rating {
        fields.check(
            "rating",
            (MIN_RATING..=MAX_RATING).contains(&rating),
            "Rating must be between 1 and 5",
        );
    }
    rating
}

#[async_trait]
impl Resource for Review {
    const NAME: &'static str = "review";
    const PLURAL: &'static str = "reviews";
    const COLLECTION: Collection = Collection::Reviews;
    const QUERY_FIELDS: &'static [&'static str] = &["review", "rating", "tour", "user"];
    const EXPAND_ONE: &'static [Expansion] = AUTHOR;
    const EXPAND_MANY: &'static [Expansion] = AUTHOR;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate_create(input: &Map<String, Value>) -> Result<Self, Vec<FieldError>> {
        let mut fields = Fields::new(input);
        let review = read_text(&mut fields, true);
        let rating = read_rating(&mut fields, true);
        let tour = fields.required::<Uuid>("tour", "Review must belong to a tour.");
        let user = fields.required::<Uuid>("user", "Review must belong to a user");

        let (Some(review), Some(rating), Some(tour), Some(user)) = (review, rating, tour, user)
        else {
            return Err(fields.into_errors());
        };
        fields.finish(Review {
            id: Uuid::now_v7(),
            review,
            rating,
            tour,
            user,
            created_at: Utc::now(),
        })
    }

    /// Only the text and the rating may change.
    fn validate_update(
        input: &Map<String, Value>,
        _current: &Self,
    ) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut fields = Fields::new(input);
        let review = read_text(&mut fields, false);
        let rating = read_rating(&mut fields, false);

        let mut patch = Map::new();
        if let Some(review) = review {
            patch.insert("review".to_string(), review.into());
        }
        if let Some(rating) = rating {
            patch.insert("rating".to_string(), rating.into());
        }
        fields.finish(patch)
    }

    async fn after_write(state: &AppState, event: WriteEvent<'_, Self>) -> AppResult<()> {
        let tour = match event {
            WriteEvent::Created(review) | WriteEvent::Deleted(review) => review.tour,
            WriteEvent::Updated { after, .. } => after.tour,
        };
        ratings::recalculate(state.store().as_ref(), tour).await?;
        Ok(())
    }
}
