//! Files under `/static`: stylesheets, scripts and uploaded tour and user
//! photos.

use std::path::{Component, Path as FsPath, PathBuf};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::warn;

use crate::state::AppState;

/// Uploaded photos can be replaced under the same name, so they are cached
/// for a shorter time than bundled assets.
const ASSET_MAX_AGE: &str = "public, max-age=86400";
const UPLOAD_MAX_AGE: &str = "public, max-age=600";

pub fn router() -> Router<AppState> {
    Router::new().route("/static/{*path}", get(serve))
}

async fn serve(State(state): State<AppState>, Path(requested): Path<String>) -> Response {
    let Some(path) = resolve(&state.config().static_dir, &requested) else {
        return missing();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let max_age = if requested.trim_start_matches('/').starts_with("img/") {
                UPLOAD_MAX_AGE
            } else {
                ASSET_MAX_AGE
            };
            (
                [
                    (header::CONTENT_TYPE, content_type(&path)),
                    (header::CACHE_CONTROL, max_age),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "static file unreadable");
            }
            missing()
        }
    }
}

/// Join `requested` onto `root`, refusing anything that could leave it.
fn resolve(root: &FsPath, requested: &str) -> Option<PathBuf> {
    if requested.contains('\0') || requested.contains('\\') {
        return None;
    }
    let relative = FsPath::new(requested.trim_start_matches('/'));
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| root.join(relative))
}

fn missing() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

fn content_type(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
