//! Liveness probe.
//!
//! `GET /health` pings the document store. A store that does not answer
//! turns the probe into a 503 so orchestrators stop routing traffic here.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    store: &'static str,
    rate_limiter: &'static str,
}

async fn probe(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let reachable = match state.store().health_check().await {
        Ok(()) => true,
        Err(e) => {
            let backend = state.store().backend();
            warn!(error = %e, backend, "store did not answer health probe");
            false
        }
    };

    let health = Health {
        status: if reachable { "healthy" } else { "unhealthy" },
        store: state.store().backend(),
        rate_limiter: state.rate_limiter().backend(),
    };
    let code = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(probe))
}
