//! The Auth Gate.
//!
//! A request moves through token extraction, verification, identity
//! resolution, the staleness check and finally the route's role check.
//! Protected routes reject at the first failing step; personalized pages use
//! [`MaybeUser`], which treats any failure as anonymous.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use cookie::Cookie;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{Role, User};
use crate::resource::{Resource, from_document};
use crate::state::AppState;
use super::{LOGGED_OUT, SESSION_COOKIE};

/// Roles a route admits. An empty set admits any authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    roles: &'static [Role],
}

impl Access {
    pub const AUTHENTICATED: Access = Access { roles: &[] };
    pub const ADMIN: Access = Access {
        roles: &[Role::Admin],
    };
    pub const TOUR_MANAGERS: Access = Access {
        roles: &[Role::Admin, Role::LeadGuide],
    };
    pub const TOUR_STAFF: Access = Access {
        roles: &[Role::Admin, Role::LeadGuide, Role::Guide],
    };
    pub const REVIEWERS: Access = Access {
        roles: &[Role::User, Role::Admin],
    };

    pub const fn roles(roles: &'static [Role]) -> Self {
        Self { roles }
    }

    pub fn permits(&self, role: Role) -> bool {
        self.roles.is_empty() || self.roles.contains(&role)
    }
}

/// The session token from `Authorization: Bearer` or the `jwt` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        let bearer = bearer.trim();
        if !bearer.is_empty() {
            return Some(bearer.to_string());
        }
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty() && v != LOGGED_OUT)
}

/// Resolve the identity behind a request's token.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<User> {
    let token = extract_token(headers).ok_or_else(|| {
        AppError::unauthorized("You are not logged in! Please log in to get access.")
    })?;
    let claims = state.tokens().verify(&token)?;

    let doc = state
        .store()
        .find_by_id(User::COLLECTION, claims.sub, &User::default_scope())
        .await?
        .ok_or_else(|| {
            AppError::unauthorized("The user belonging to this token no longer exists.")
        })?;
    let user: User = from_document(doc)?;

    if user.changed_password_after(claims.issued_at_millis()) {
        debug!(user = %user.id, "stale session token");
        return Err(AppError::unauthorized(
            "User recently changed password! Please log in again.",
        ));
    }
    Ok(user)
}

pub fn authorize(user: &User, access: Access) -> AppResult<()> {
    if access.permits(user.role) {
        Ok(())
    } else {
        debug!(user = %user.id, role = %user.role, "role not permitted");
        Err(AppError::Forbidden)
    }
}

/// Route layer: authenticate, check the role, and hand the user downstream.
///
/// ```ignore
/// .route_layer(from_fn_with_state((state.clone(), Access::ADMIN), enforce_access))
/// ```
pub async fn enforce_access(
    State((state, access)): State<(AppState, Access)>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match authenticate(&state, request.headers()).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = authorize(&user, access) {
        return e.into_response();
    }
    request.extensions_mut().insert(CurrentUser(user));
    next.run(request).await
}

/// The authenticated user. Reuses the gate's result when a route layer ran.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> AppResult<Self> {
        if let Some(current) = parts.extensions.get::<CurrentUser>() {
            return Ok(current.clone());
        }
        authenticate(state, &parts.headers).await.map(CurrentUser)
    }
}

/// The user if the request carries a valid session, otherwise None.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(CurrentUser(user)) = parts.extensions.get::<CurrentUser>() {
            return Ok(MaybeUser(Some(user.clone())));
        }
        match authenticate(state, &parts.headers).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(e) => {
                debug!(error = %e, "continuing anonymously");
                Ok(MaybeUser(None))
            }
        }
    }
}
