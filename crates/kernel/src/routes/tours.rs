//! Tour routes, including nested reviews, analytics and geo search.

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::auth::{Access, CurrentUser};
use crate::error::{AppError, AppResult};
use crate::middleware::ApiJson;
use crate::models::{Review, Tour};
use crate::query::{Filter, QueryParams};
use crate::resource::handlers::{
    create, create_one, delete_one, envelope, fetch, find_many, get_all, get_one, listing_envelope,
    update, update_one,
};
use crate::resource::{parse_id, present, to_document};
use crate::services::tours::{self as analytics, DistanceUnit, LatLng};
use crate::state::AppState;
use super::gated;

/// Fields returned by the top-five alias.
const TOP_FIVE_FIELDS: &str = "name,price,ratings_average,duration,summary";

pub fn router(state: &AppState) -> Router<AppState> {
    let authenticated = Router::new()
        .route("/tours", get(get_all::<Tour>))
        .route("/tours/top-five-tours", get(top_five_tours))
        .route("/tours/tour-stats", get(tour_stats))
        .route(
            "/tours/tours-within/{distance}/center/{latlng}/unit/{unit}",
            get(tours_within),
        )
        .route("/tours/distances/{latlng}/unit/{unit}", get(distances))
        .route("/tours/{id}", get(get_one::<Tour>))
        .route("/tours/{id}/reviews", get(tour_reviews));

    let staff = Router::new().route("/tours/monthly-plan/{year}", get(monthly_plan));

    let managers = Router::new()
        .route("/tours", post(create_one::<Tour>))
        .route(
            "/tours/{id}",
            patch(update_one::<Tour>).delete(delete_one::<Tour>),
        )
        .route(
            "/tours/{id}/images",
            patch(upload_images).layer(DefaultBodyLimit::max(state.config().upload_limit_bytes)),
        );

    let reviewers = Router::new().route("/tours/{id}/reviews", post(create_tour_review));

    gated(state, Access::AUTHENTICATED, authenticated)
        .merge(gated(state, Access::TOUR_STAFF, staff))
        .merge(gated(state, Access::TOUR_MANAGERS, managers))
        .merge(gated(state, Access::REVIEWERS, reviewers))
}

async fn top_five_tours(
    State(state): State<AppState>,
    params: QueryParams,
) -> AppResult<Json<Value>> {
    let params = params
        .set("limit", "5")
        .set("sort", "-ratings_average,price")
        .set("fields", TOP_FIVE_FIELDS);
    let listing = find_many::<Tour>(&state, Vec::new(), &params).await?;
    Ok(listing_envelope::<Tour>(listing))
}

async fn tour_stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let stats = analytics::tour_stats(state.store().as_ref()).await?;
    Ok(Json(json!({ "status": "success", "data": { "stats": stats } })))
}

async fn monthly_plan(
    State(state): State<AppState>,
    Path(year): Path<String>,
) -> AppResult<Json<Value>> {
    let year: i32 = year
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid year: {year}")))?;
    let plan = analytics::monthly_plan(state.store().as_ref(), year).await?;
    Ok(Json(json!({
        "status": "success",
        "results": plan.len(),
        "data": { "plan": plan },
    })))
}

async fn tours_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> AppResult<Json<Value>> {
    let distance: f64 = distance
        .parse()
        .ok()
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid distance: {distance}")))?;
    let center = LatLng::parse(&latlng)?;
    let tours = analytics::load_tours(state.store().as_ref(), Vec::new()).await?;
    let found = analytics::within(tours, center, distance, DistanceUnit::parse(&unit));

    let docs = found
        .iter()
        .map(|tour| to_document(tour).map(present::<Tour>))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(json!({
        "status": "success",
        "results": docs.len(),
        "data": { "tours": docs },
    })))
}

async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let center = LatLng::parse(&latlng)?;
    let tours = analytics::load_tours(state.store().as_ref(), Vec::new()).await?;
    let ranked = analytics::distances(&tours, center, DistanceUnit::parse(&unit));
    Ok(Json(json!({ "status": "success", "data": { "distances": ranked } })))
}

/// Reviews of one tour, through the generic listing.
async fn tour_reviews(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: QueryParams,
) -> AppResult<Json<Value>> {
    let tour_id = parse_id(&id)?;
    let scope = vec![Filter::eq("tour", tour_id.to_string())];
    let listing = find_many::<Review>(&state, scope, &params).await?;
    Ok(listing_envelope::<Review>(listing))
}

/// Create a review on the tour in the path, written by the current user.
async fn create_tour_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
    ApiJson(mut body): ApiJson<Map<String, Value>>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let tour: Tour = fetch(&state, parse_id(&id)?).await?;
    body.insert("tour".to_string(), Value::String(tour.id.to_string()));
    body.insert("user".to_string(), Value::String(user.id.to_string()));
    let review = create::<Review>(&state, &body).await?;
    let doc = present::<Review>(to_document(&review)?);
    Ok((StatusCode::CREATED, envelope::<Review>(doc)))
}

/// Replace the cover and gallery of a tour from a multipart upload.
async fn upload_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let tour: Tour = fetch(&state, parse_id(&id)?).await?;

    let mut cover = None;
    let mut images = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image_cover" => {
                let bytes = field.bytes().await.map_err(|e| AppError::BadRequest(e.body_text()))?;
                cover = Some(bytes.to_vec());
            }
            "images" => {
                let bytes = field.bytes().await.map_err(|e| AppError::BadRequest(e.body_text()))?;
                images.push(bytes.to_vec());
            }
            _ => debug!(field = %name, "ignoring multipart field"),
        }
    }
    if cover.is_none() && images.is_empty() {
        return Err(AppError::BadRequest(
            "Please upload an image_cover or images".to_string(),
        ));
    }

    let stored = state.images().tour_images(tour.id, cover, images).await?;
    let mut changes = Map::new();
    if let Some(cover) = stored.image_cover {
        changes.insert("image_cover".to_string(), Value::String(cover));
    }
    if !stored.images.is_empty() {
        changes.insert("images".to_string(), json!(stored.images));
    }
    info!(tour = %tour.id, "tour images replaced");

    let doc = update::<Tour>(&state, tour.id, &changes).await?;
    Ok(envelope::<Tour>(doc))
}
