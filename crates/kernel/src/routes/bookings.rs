//! Booking routes and the payment provider webhook.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::auth::{Access, CurrentUser};
use crate::error::{AppError, AppResult};
use crate::models::{Booking, Tour};
use crate::query::{Filter, QueryParams};
use crate::resource::handlers::{
    self, create_one, delete_one, fetch, find_many, get_all, get_one, listing_envelope, update_one,
};
use crate::resource::parse_id;
use crate::services::payments::parse_completed_checkout;
use crate::state::AppState;
use super::gated;
use super::users::find_user_by_email;

pub fn router(state: &AppState) -> Router<AppState> {
    let customers = Router::new()
        .route("/bookings/checkout-session/{tour_id}", get(checkout_session))
        .route("/bookings/my", get(my_bookings));

    let managers = Router::new()
        .route(
            "/bookings",
            get(get_all::<Booking>).post(create_one::<Booking>),
        )
        .route("/bookings/{id}", get(get_one::<Booking>));

    let admin = Router::new().route(
        "/bookings/{id}",
        patch(update_one::<Booking>).delete(delete_one::<Booking>),
    );

    gated(state, Access::AUTHENTICATED, customers)
        .merge(gated(state, Access::TOUR_MANAGERS, managers))
        .merge(gated(state, Access::ADMIN, admin))
}

/// `POST /webhook-checkout`, mounted outside the API prefix.
pub fn webhook_router(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/webhook-checkout",
        post(webhook_checkout).layer(DefaultBodyLimit::max(state.config().upload_limit_bytes)),
    )
}

fn payments_unavailable() -> AppError {
    AppError::Unavailable("Payments are not available right now.".to_string())
}

async fn checkout_session(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Value>> {
    let payments = state.payments().ok_or_else(payments_unavailable)?;
    let tour: Tour = fetch(&state, parse_id(&tour_id)?).await?;
    let session = payments.create_session(&tour, &user).await?;
    Ok(Json(json!({ "status": "success", "session": session })))
}

async fn my_bookings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: QueryParams,
) -> AppResult<Json<Value>> {
    let scope = vec![Filter::eq("user", user.id.to_string())];
    let listing = find_many::<Booking>(&state, scope, &params).await?;
    Ok(listing_envelope::<Booking>(listing))
}

/// Create a booking from a signed checkout-completed event.
async fn webhook_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let payments = state.payments().ok_or_else(payments_unavailable)?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    payments
        .verify_webhook(&body, signature, Utc::now().timestamp())
        .map_err(|e| {
            warn!(error = %e, "rejected webhook");
            AppError::BadRequest(format!("Webhook error: {e}"))
        })?;

    let checkout = parse_completed_checkout(&body)
        .map_err(|e| AppError::BadRequest(format!("Webhook error: {e}")))?;
    if let Some(checkout) = checkout {
        let user = find_user_by_email(&state, &checkout.customer_email)
            .await?
            .ok_or_else(|| AppError::not_found("No user found for this checkout"))?;
        let mut input = Map::new();
        input.insert("tour".to_string(), json!(checkout.tour));
        input.insert("user".to_string(), json!(user.id));
        input.insert("price".to_string(), json!(checkout.price));
        let booking = handlers::create::<Booking>(&state, &input).await?;
        info!(booking = %booking.id, tour = %booking.tour, "booking created from checkout");
    }
    Ok(Json(json!({ "received": true })))
}
