//! JSON body extraction with input sanitization.
//!
//! [`ApiJson`] replaces `axum::Json` on every API route. After parsing it
//! drops keys that could address query operators (`$`-prefixed or dotted)
//! and strips markup from string values, at any depth.

use std::collections::HashSet;

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;

/// Sanitized JSON request body.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::PayloadTooLarge
            } else {
                AppError::BadRequest(e.body_text())
            }
        })?;

        let mut value = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))?
        };
        sanitize(&mut value);

        serde_json::from_value(value)
            .map(ApiJson)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {e}")))
    }
}

/// Clean a parsed body in place.
pub fn sanitize(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !is_operator_key(key));
            for (key, child) in map.iter_mut() {
                // Credentials are compared byte for byte; leave them alone.
                if key.starts_with("password") && child.is_string() {
                    continue;
                }
                sanitize(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize),
        Value::String(text) => {
            if text.contains('<') {
                *text = strip_markup(text);
            }
        }
        _ => {}
    }
}

fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Remove every tag, keeping text content except that of scripts and styles.
pub fn strip_markup(input: &str) -> String {
    ammonia::Builder::empty()
        .clean_content_tags(HashSet::from(["script", "style"]))
        .clean(input)
        .to_string()
}
