//! Review routes. Authors edit their own reviews; admins edit any.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{Map, Value};

use super::gated;
use crate::auth::{Access, CurrentUser};
use crate::error::{AppError, AppResult};
use crate::middleware::ApiJson;
use crate::models::{Review, User};
use crate::resource::handlers::{self, create_one, envelope, fetch, get_all, get_one};
use crate::resource::parse_id;
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    let readers = Router::new()
        .route("/reviews", get(get_all::<Review>))
        .route("/reviews/{id}", get(get_one::<Review>));

    let reviewers = Router::new()
        .route("/reviews", post(create_own_review))
        .route("/reviews/{id}", patch(update_review).delete(delete_review));

    gated(state, Access::AUTHENTICATED, readers).merge(gated(state, Access::REVIEWERS, reviewers))
}

/// Create a review; the author defaults to the current user.
async fn create_own_review(
    state: State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(mut body): ApiJson<Map<String, Value>>,
) -> AppResult<(StatusCode, Json<Value>)> {
    if !user.is_admin() || !body.contains_key("user") {
        body.insert("user".to_string(), Value::String(user.id.to_string()));
    }
    create_one::<Review>(state, ApiJson(body)).await
}

async fn update_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<Map<String, Value>>,
) -> AppResult<Json<Value>> {
    let review = owned_review(&state, &id, &user).await?;
    let doc = handlers::update::<Review>(&state, review.id, &body).await?;
    Ok(envelope::<Review>(doc))
}

async fn delete_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> AppResult<StatusCode> {
    let review = owned_review(&state, &id, &user).await?;
    handlers::delete::<Review>(&state, review.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The review, if `user` wrote it or is an admin.
async fn owned_review(state: &AppState, id: &str, user: &User) -> AppResult<Review> {
    let review: Review = fetch(state, parse_id(id)?).await?;
    if review.user != user.id && !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(review)
}
