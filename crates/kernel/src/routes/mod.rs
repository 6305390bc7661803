//! HTTP route handlers.

pub mod bookings;
pub mod health;
pub mod reviews;
pub mod static_files;
pub mod tours;
pub mod users;
pub mod views;

use axum::Router;
use axum::middleware::from_fn_with_state;

use crate::auth::{Access, enforce_access};
use crate::state::AppState;

/// Path prefix of the JSON API.
pub const API_PREFIX: &str = "/api/v1";

/// Put every route of `routes` behind the Auth Gate with `access`.
pub(crate) fn gated(
    state: &AppState,
    access: Access,
    routes: Router<AppState>,
) -> Router<AppState> {
    routes.route_layer(from_fn_with_state((state.clone(), access), enforce_access))
}

/// All `/api/v1` resource routes.
pub fn api_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(tours::router(state))
        .merge(users::router(state))
        .merge(reviews::router(state))
        .merge(bookings::router(state))
}
