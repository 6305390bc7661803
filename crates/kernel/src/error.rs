//! Application error types.
//!
//! Every handler returns [`AppResult`]. Errors are split into operational
//! failures, whose message is safe to show a client, and programming or
//! infrastructure failures, which are logged in full and reported generically.
//! The response carries an [`ErrorReport`] extension so the error formatter
//! middleware can re-render it for the current mode and path.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::store::StoreError;

/// Message shown for non-operational failures.
pub const GENERIC_MESSAGE: &str = "Something went very wrong!";

/// A single failing field in a validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{}", validation_message(.0))]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid {field}: {value}")]
    InvalidId { field: String, value: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid token. Please log in again!")]
    TokenInvalid,

    #[error("Your token has expired! Please log in again.")]
    TokenExpired,

    #[error("You do not have permission to perform this action")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("Duplicate field value: {value}. Please use another value!")]
    Duplicate { fields: Vec<String>, value: String },

    #[error("Request body is too large")]
    PayloadTooLarge,

    #[error("Too many requests from this IP, please try again in an hour!")]
    TooManyRequests { retry_after: u64 },

    #[error("{0}")]
    Unavailable(String),

    #[error("There was an error sending the email. Try again later!")]
    EmailFailed(#[source] anyhow::Error),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

fn validation_message(errors: &[FieldError]) -> String {
    let parts: Vec<String> = errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}) {}", i + 1, e.message))
        .collect();
    format!("Invalid input data. {}", parts.join(" "))
}

impl AppError {
    /// Shorthand for a validation failure on one field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) | AppError::InvalidId { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) | AppError::TokenInvalid | AppError::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Duplicate { .. } => StatusCode::CONFLICT,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::EmailFailed(_) | AppError::Internal(_) | AppError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Operational errors carry a message that is safe to return to clients.
    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Internal(_) | AppError::Database(_))
    }

    /// Build the report without consuming the error.
    pub fn report(&self) -> ErrorReport {
        let operational = self.is_operational();
        let message = if operational {
            self.to_string()
        } else {
            GENERIC_MESSAGE.to_string()
        };
        let errors = match self {
            AppError::Validation(errors) => errors.clone(),
            _ => Vec::new(),
        };
        let detail = match self {
            AppError::Internal(e) | AppError::EmailFailed(e) => format!("{e:#}"),
            AppError::Database(e) => e.to_string(),
            other => format!("{other:?}"),
        };
        ErrorReport {
            status: self.status_code(),
            message,
            detail,
            operational,
            errors,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Duplicate { fields, value } => AppError::Duplicate { fields, value },
            StoreError::Unexpected(e) => AppError::Internal(e),
        }
    }
}

/// Mode-independent description of an error response.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    /// Client-safe message.
    pub message: String,
    /// Full detail, only exposed outside production.
    pub detail: String,
    pub operational: bool,
    pub errors: Vec<FieldError>,
}

impl ErrorReport {
    /// "fail" for client errors, "error" for server errors.
    pub fn status_label(&self) -> &'static str {
        if self.status.is_server_error() {
            "error"
        } else {
            "fail"
        }
    }

    /// Message for the current mode: development always shows the real one.
    pub fn message_for(&self, expose_detail: bool) -> &str {
        if expose_detail && !self.operational {
            &self.detail
        } else {
            &self.message
        }
    }

    pub fn to_json(&self, expose_detail: bool) -> Value {
        let mut body = json!({
            "status": self.status_label(),
            "message": self.message_for(expose_detail),
        });
        if !self.errors.is_empty() {
            body["errors"] = json!(self.errors);
        }
        if expose_detail {
            body["error"] = json!(self.detail);
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %format!("{e:#}"), "internal server error");
            }
            AppError::Database(e) => tracing::error!(error = %e, "database error"),
            AppError::EmailFailed(e) => {
                tracing::error!(error = %format!("{e:#}"), "email delivery failed");
            }
            _ => {}
        }

        let report = self.report();
        let mut response = (report.status, Json(report.to_json(false))).into_response();
        if let AppError::TooManyRequests { retry_after } = &self
            && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response.extensions_mut().insert(report);
        response
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
