//! Account routes: signup, login, password flows and profile management.

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::auth::reset::{self, ResetToken};
use crate::auth::{Access, CurrentUser, logout_cookie, password, send_token};
use crate::error::{AppError, AppResult};
use crate::middleware::ApiJson;
use crate::models::User;
use crate::models::user::check_new_password;
use crate::query::Filter;
use crate::resource::handlers::{
    self, delete_one, envelope, find_one, get_all, get_one, update, update_one,
};
use crate::resource::{Fields, Resource, from_document, not_found, patch_value};
use crate::state::AppState;
use super::gated;

const PASSWORD_ROUTE_MESSAGE: &str =
    "This route is not for password updates. Please use /update-my-password.";

pub fn router(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/logout", get(logout))
        .route("/users/forgot-password", post(forgot_password))
        .route("/users/reset-password/{token}", patch(reset_password));

    let account = Router::new()
        .route("/users/update-my-password", patch(update_my_password))
        .route("/users/me", get(me))
        .route(
            "/users/update-me",
            patch(update_me).layer(DefaultBodyLimit::max(state.config().upload_limit_bytes)),
        )
        .route("/users/delete-me", delete(delete_me));

    let admin = Router::new()
        .route("/users", get(get_all::<User>))
        .route(
            "/users/{id}",
            get(get_one::<User>)
                .patch(update_one::<User>)
                .delete(delete_one::<User>),
        );

    public
        .merge(gated(state, Access::AUTHENTICATED, account))
        .merge(gated(state, Access::ADMIN, admin))
}

/// Only these signup fields are accepted; roles are assigned by an admin.
const SIGNUP_FIELDS: [&str; 4] = ["name", "email", "password", "password_confirm"];

async fn signup(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Map<String, Value>>,
) -> AppResult<Response> {
    let input: Map<String, Value> = body
        .into_iter()
        .filter(|(k, _)| SIGNUP_FIELDS.contains(&k.as_str()))
        .collect();
    let user = handlers::create::<User>(&state, &input).await?;

    if let Err(e) = state.email().send_welcome(&user).await {
        warn!(user = %user.id, error = %format!("{e:#}"), "failed to send welcome email");
    }
    send_token(&state, &user, StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    email: Option<String>,
    password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginBody>,
) -> AppResult<Response> {
    let (Some(email), Some(candidate)) = (body.email, body.password) else {
        return Err(AppError::BadRequest(
            "Please provide email and password!".to_string(),
        ));
    };

    let incorrect = || AppError::unauthorized("Incorrect email or password");
    let user = find_user_by_email(&state, &email)
        .await?
        .ok_or_else(incorrect)?;
    if !user.correct_password(&candidate).await? {
        return Err(incorrect());
    }
    info!(user = %user.id, "user logged in");
    send_token(&state, &user, StatusCode::OK)
}

async fn logout(State(state): State<AppState>) -> Response {
    let mut response = Json(json!({ "status": "success" })).into_response();
    if let Ok(value) = HeaderValue::from_str(&logout_cookie(state.config())) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

#[derive(Debug, Deserialize)]
struct ForgotPasswordBody {
    email: Option<String>,
}

async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ForgotPasswordBody>,
) -> AppResult<Json<Value>> {
    let no_user = || AppError::not_found("There is no user with email address.");
    let email = body.email.ok_or_else(no_user)?;
    let user = find_user_by_email(&state, &email).await?.ok_or_else(no_user)?;

    let token = ResetToken::issue(Utc::now());
    state
        .store()
        .update(User::COLLECTION, user.id, token.store_patch())
        .await?;

    if let Err(e) = state.email().send_password_reset(&user, &token.plain).await {
        state
            .store()
            .update(User::COLLECTION, user.id, reset::clear_patch())
            .await?;
        return Err(AppError::EmailFailed(e));
    }
    info!(user = %user.id, "password reset token sent");
    Ok(Json(json!({
        "status": "success",
        "message": "Token sent to email!",
    })))
}

async fn reset_password(
    State(state): State<AppState>,
    Path(plain): Path<String>,
    ApiJson(body): ApiJson<Map<String, Value>>,
) -> AppResult<Response> {
    let now = Utc::now();
    let mut filters = User::default_scope();
    filters.push(reset::lookup_filter(&plain));
    let user = match state.store().find_one(User::COLLECTION, filters).await? {
        Some(doc) => Some(from_document::<User>(doc)?),
        None => None,
    }
    .filter(|user| reset::is_unexpired(user.password_reset_expires, now))
    .ok_or_else(|| AppError::BadRequest("Token is invalid or has expired".to_string()))?;

    let mut fields = Fields::new(&body);
    let new_password = check_new_password(&mut fields, "password", "password_confirm");
    let new_password = fields
        .finish(new_password)
        .map_err(AppError::Validation)?
        .ok_or_else(|| AppError::invalid("password", "Please provide a password"))?;

    let mut changes = reset::clear_patch();
    changes.extend(password_patch(new_password).await?);
    let user = store_user_patch(&state, &user, changes).await?;
    info!(user = %user.id, "password reset");
    send_token(&state, &user, StatusCode::OK)
}

async fn update_my_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<Map<String, Value>>,
) -> AppResult<Response> {
    let mut fields = Fields::new(&body);
    let current: Option<String> =
        fields.required("password_current", "Please provide your current password");
    let new_password = check_new_password(&mut fields, "password", "password_confirm");
    let (current, new_password) = fields
        .finish((current, new_password))
        .map_err(AppError::Validation)?;
    let (Some(current), Some(new_password)) = (current, new_password) else {
        return Err(AppError::BadRequest("Please provide your passwords".to_string()));
    };

    if !user.correct_password(&current).await? {
        return Err(AppError::unauthorized("Your current password is wrong."));
    }

    let user = store_user_patch(&state, &user, password_patch(new_password).await?).await?;
    info!(user = %user.id, "password changed");
    send_token(&state, &user, StatusCode::OK)
}

async fn me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Value>> {
    let doc = find_one::<User>(&state, user.id, &[]).await?;
    Ok(envelope::<User>(doc))
}

/// Update name, email and (multipart only) photo of the current user.
async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    request: Request,
) -> AppResult<Json<Value>> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let (body, photo) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        read_profile_form(multipart).await?
    } else {
        let ApiJson(body) = ApiJson::<Map<String, Value>>::from_request(request, &state).await?;
        (body, None)
    };

    if ["password", "password_confirm", "password_current"]
        .iter()
        .any(|key| body.contains_key(*key))
    {
        return Err(AppError::BadRequest(PASSWORD_ROUTE_MESSAGE.to_string()));
    }

    let mut input: Map<String, Value> = body
        .into_iter()
        .filter(|(k, _)| k == "name" || k == "email")
        .collect();
    if let Some(bytes) = photo {
        let filename = state.images().user_photo(user.id, bytes).await?;
        input.insert("photo".to_string(), Value::String(filename));
    }

    let doc = update::<User>(&state, user.id, &input).await?;
    Ok(envelope::<User>(doc))
}

async fn read_profile_form(
    mut multipart: Multipart,
) -> AppResult<(Map<String, Value>, Option<Vec<u8>>)> {
    let mut body = Map::new();
    let mut photo = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "photo" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            photo = Some(bytes.to_vec());
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            body.insert(name, Value::String(text));
        }
    }
    Ok((body, photo))
}

async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<StatusCode> {
    handlers::delete::<User>(&state, user.id).await?;
    info!(user = %user.id, "account deactivated");
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn find_user_by_email(state: &AppState, email: &str) -> AppResult<Option<User>> {
    let mut filters = User::default_scope();
    filters.push(Filter::eq("email", email.trim().to_lowercase()));
    state
        .store()
        .find_one(User::COLLECTION, filters)
        .await?
        .map(from_document)
        .transpose()
}

/// Hash a new password and stamp the change time. Tokens issued before the
/// stamp are stale; the token signed after the change is not.
async fn password_patch(new_password: String) -> AppResult<Map<String, Value>> {
    let hash = password::hash(new_password).await?;
    let mut changes = Map::new();
    changes.insert("password".to_string(), Value::String(hash));
    changes.insert("password_changed_at".to_string(), patch_value(&Utc::now()));
    Ok(changes)
}

async fn store_user_patch(
    state: &AppState,
    user: &User,
    changes: Map<String, Value>,
) -> AppResult<User> {
    let doc = state
        .store()
        .update(User::COLLECTION, user.id, changes)
        .await?
        .ok_or_else(not_found::<User>)?;
    from_document(doc)
}
