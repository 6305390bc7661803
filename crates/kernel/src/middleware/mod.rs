//! HTTP middleware components.
//!
//! Provides rate limiting, body sanitization and error formatting.

pub mod errors;
pub mod rate_limit;
pub mod sanitize;

pub use errors::format_errors;
pub use rate_limit::{RateLimiter, get_client_id, limit_api_requests};
pub use sanitize::ApiJson;
