//! Router assembly.

use std::any::Any;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::Uri;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::middleware::{format_errors, limit_api_requests};
use crate::routes::{self, API_PREFIX};
use crate::state::AppState;

/// Build the application router.
///
/// Request flow (outermost first): static files → panic catcher → request
/// log (development only) → rate limiter → body limit → compression →
/// error formatter → panic catcher → routes → not-found fallback.
pub fn build_router(state: AppState) -> Router {
    let config = state.config();

    let routes = Router::new()
        .nest(API_PREFIX, routes::api_router(&state))
        .merge(routes::views::router())
        .merge(routes::bookings::webhook_router(&state))
        .merge(routes::health::router())
        .fallback(not_found);

    // Middleware layers (last added = first executed in request flow)
    let mut app = with_error_handling(routes, &state)
        .layer(CompressionLayer::new())
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(from_fn_with_state(state.clone(), limit_api_requests));

    if !config.is_production() {
        app = app.layer(TraceLayer::new_for_http());
    }

    routes::static_files::router()
        .merge(app.layer(CatchPanicLayer::custom(panic_response)))
        .with_state(state)
}

/// Turn handler panics into internal errors, then format every error
/// response for its path and mode.
fn with_error_handling(routes: Router<AppState>, state: &AppState) -> Router<AppState> {
    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn_with_state(state.clone(), format_errors))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    AppError::Internal(anyhow::anyhow!("request handler panicked: {detail}")).into_response()
}

async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("Can't find {} on this server!", uri.path()))
}
