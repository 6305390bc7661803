//! Authentication: session tokens, the Auth Gate, password hashing and the
//! password-reset token flow.

pub mod gate;
pub mod password;
pub mod reset;
pub mod token;

use axum::Json;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use cookie::{Cookie, SameSite};
use serde_json::json;

use crate::config::Config;
use crate::error::AppResult;
use crate::models::User;
use crate::resource::{present, to_document};
use crate::state::AppState;

pub use gate::{Access, CurrentUser, MaybeUser, authenticate, authorize, enforce_access};
pub use token::{Claims, TokenService};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "jwt";
/// Placeholder value written on logout.
pub const LOGGED_OUT: &str = "loggedout";

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(config: &Config, token: &str) -> String {
    let max_age = i64::try_from(config.jwt_cookie_expires_in.as_secs()).unwrap_or(i64::MAX);
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.is_production())
        .max_age(cookie::time::Duration::seconds(max_age))
        .build()
        .to_string()
}

/// `Set-Cookie` value that replaces the session with a short-lived placeholder.
pub fn logout_cookie(config: &Config) -> String {
    Cookie::build((SESSION_COOKIE, LOGGED_OUT))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.is_production())
        .max_age(cookie::time::Duration::seconds(10))
        .build()
        .to_string()
}

/// Sign a token for `user` and answer with it in the body and the cookie.
pub fn send_token(state: &AppState, user: &User, status: StatusCode) -> AppResult<Response> {
    let token = state.tokens().sign(user.id)?;
    let body = json!({
        "status": "success",
        "token": token,
        "data": { "user": present::<User>(to_document(user)?) },
    });
    let mut response = (status, Json(body)).into_response();
    let cookie = session_cookie(state.config(), &token);
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(response)
}
