//! Server-rendered pages.
//!
//! Pages read through the same resource functions as the API. The current
//! user, when there is one, is available to every template as `user`.

use axum::Router;
use axum::extract::{Form, Path, Query, State};
use axum::response::Html;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::{AppError, AppResult};
use crate::models::{Booking, Tour, User};
use crate::query::{Comparison, Filter, FindQuery, SortKey};
use crate::resource::expand::expand_one;
use crate::resource::handlers::{self, find_one};
use crate::resource::{Resource, from_document, present, to_document};
use crate::state::AppState;

const BOOKING_ALERT: &str = "Your booking was successful! Please check your email for a \
     confirmation. If your booking doesn't show up here immediately, please come back later.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(overview))
        .route("/tour/{slug}", get(tour_page))
        .route("/login", get(login))
        .route("/me", get(account))
        .route("/my-tours", get(my_tours))
        .route("/submit-user-data", post(submit_user_data))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    alert: Option<String>,
}

/// Render `template` with the shared page variables.
fn render(
    state: &AppState,
    template: &str,
    title: &str,
    user: Option<&User>,
    mut context: tera::Context,
) -> AppResult<Html<String>> {
    context.insert("title", title);
    if let Some(user) = user {
        context.insert("user", &present::<User>(to_document(user)?));
    }
    Ok(Html(state.theme().render(template, &context)?))
}

fn alert_for(query: &PageQuery) -> Option<&'static str> {
    match query.alert.as_deref() {
        Some("booking") => Some(BOOKING_ALERT),
        _ => None,
    }
}

async fn overview(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<String>> {
    let query_handle =
        FindQuery::scoped(Tour::default_scope()).sort_by(SortKey::desc("ratings_average"));
    let tours: Vec<Value> = state
        .store()
        .find(Tour::COLLECTION, &query_handle)
        .await?
        .into_iter()
        .map(present::<Tour>)
        .collect();

    let mut context = tera::Context::new();
    context.insert("tours", &tours);
    if let Some(alert) = alert_for(&query) {
        context.insert("alert", alert);
    }
    render(&state, "overview.html", "All Tours", user.as_ref(), context)
}

async fn tour_page(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(slug): Path<String>,
) -> AppResult<Html<String>> {
    let mut filters = Tour::default_scope();
    filters.push(Filter::eq("slug", slug));
    let mut doc = state
        .store()
        .find_one(Tour::COLLECTION, filters)
        .await?
        .ok_or_else(|| AppError::not_found("There is no tour with that name."))?;
    expand_one(state.store().as_ref(), &mut doc, Tour::EXPAND_ONE).await?;
    let doc = present::<Tour>(doc);

    let title = format!(
        "{} Tour",
        doc.get("name").and_then(Value::as_str).unwrap_or_default()
    );
    let mut context = tera::Context::new();
    context.insert("tour", &doc);
    render(&state, "tour.html", &title, user.as_ref(), context)
}

async fn login(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> AppResult<Html<String>> {
    render(
        &state,
        "login.html",
        "Log into your account",
        user.as_ref(),
        tera::Context::new(),
    )
}

async fn account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Html<String>> {
    render(&state, "account.html", "Your account", Some(&user), tera::Context::new())
}

/// Tours the current user has booked.
async fn my_tours(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<String>> {
    let bookings = state
        .store()
        .find(
            Booking::COLLECTION,
            &FindQuery::scoped(vec![Filter::eq("user", user.id.to_string())]),
        )
        .await?
        .into_iter()
        .map(from_document::<Booking>)
        .collect::<AppResult<Vec<_>>>()?;

    let tour_ids: Vec<Value> = bookings
        .iter()
        .map(|b| Value::String(b.tour.to_string()))
        .collect();
    let tours: Vec<Value> = if tour_ids.is_empty() {
        Vec::new()
    } else {
        let mut filters = Tour::default_scope();
        filters.push(Filter::new("id", Comparison::In, Value::Array(tour_ids)));
        state
            .store()
            .find(Tour::COLLECTION, &FindQuery::scoped(filters))
            .await?
            .into_iter()
            .map(present::<Tour>)
            .collect()
    };

    let mut context = tera::Context::new();
    context.insert("tours", &tours);
    if let Some(alert) = alert_for(&query) {
        context.insert("alert", alert);
    }
    render(&state, "overview.html", "My Tours", Some(&user), context)
}

#[derive(Debug, Deserialize)]
struct UserDataForm {
    name: String,
    email: String,
}

/// Plain form fallback for updating name and email.
async fn submit_user_data(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Form(form): Form<UserDataForm>,
) -> AppResult<Html<String>> {
    let mut input = Map::new();
    input.insert("name".to_string(), Value::String(form.name));
    input.insert("email".to_string(), Value::String(form.email));
    handlers::update::<User>(&state, user.id, &input).await?;

    let doc = find_one::<User>(&state, user.id, &[]).await?;
    let mut context = tera::Context::new();
    context.insert("user", &doc);
    context.insert("title", "Your account");
    Ok(Html(state.theme().render("account.html", &context)?))
}
