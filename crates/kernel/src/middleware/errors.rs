//! Global error formatter.
//!
//! Error responses leave handlers as production-safe JSON carrying an
//! [`ErrorReport`]. This layer runs last: outside production it re-renders
//! the JSON with full detail, and for page paths it renders `error.html`.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::error::ErrorReport;
use crate::state::AppState;

/// Message shown on error pages for non-operational failures in production.
const PAGE_FALLBACK: &str = "Please try again later.";

pub async fn format_errors(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let is_api = request.uri().path().starts_with("/api");
    let response = next.run(request).await;

    let Some(report) = response.extensions().get::<ErrorReport>().cloned() else {
        return response;
    };
    let expose = !state.config().is_production();

    if is_api {
        if !expose {
            return response;
        }
        let body = report.to_json(true).to_string();
        return replace_body(response, body, "application/json");
    }

    match render_page(&state, &report, expose) {
        Ok(html) => replace_body(response, html, "text/html; charset=utf-8"),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "failed to render error page");
            response
        }
    }
}

fn render_page(state: &AppState, report: &ErrorReport, expose: bool) -> anyhow::Result<String> {
    let msg = if expose || report.operational {
        report.message_for(expose)
    } else {
        PAGE_FALLBACK
    };
    let mut context = tera::Context::new();
    context.insert("title", "Something went wrong!");
    context.insert("msg", msg);
    context.insert("status", &report.status.as_u16());
    state.theme().render("error.html", &context)
}

/// Swap the body, keeping status and the other headers.
fn replace_body(response: Response, body: String, content_type: &'static str) -> Response {
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    Response::from_parts(parts, Body::from(body))
}
