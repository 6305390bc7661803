#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Router-wide behaviour: health, fallbacks, error formatting, rate and body
//! limits, static files and server-rendered pages.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;

use tourbook_kernel::Config;
use tourbook_kernel::config::Environment;
use tourbook_kernel::models::Role;
use tourbook_test_utils::{assert, signup_body, tour, unique_email};

mod common;
use common::{TestApp, test_config};

// =============================================================================
// Health and fallbacks
// =============================================================================

#[tokio::test]
async fn health_check_reports_the_store() {
    let app = TestApp::new();

    let response = app.get("/health", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["store"], "memory");
    assert_eq!(response.body["rate_limiter"], "local");
}

#[tokio::test]
async fn unknown_api_paths_answer_json_404() {
    let app = TestApp::new();

    let response = app.get("/api/v1/unicorns", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["status"], "fail");
    assert::contains(response.body["message"].as_str().unwrap(), "on this server!");
}

#[tokio::test]
async fn unknown_pages_render_the_error_page() {
    let app = TestApp::new();

    let response = app.get("/no/such/page", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let content_type = response.headers.get(header::CONTENT_TYPE).unwrap();
    assert::contains(content_type.to_str().unwrap(), "text/html");
    assert::contains(&response.text, "Uh oh! Something went wrong!");
    assert::contains(&response.text, "on this server!");
}

// =============================================================================
// Error formatting per mode
// =============================================================================

#[tokio::test]
async fn development_errors_carry_detail() {
    let app = TestApp::new();
    let user = app.create_user("Curious Dev", Role::User).await;

    let response = app.get("/api/v1/tours/not-an-id", Some(&user.token)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["status"], "fail");
    assert::has_key(&response.body, "error");
}

#[tokio::test]
async fn production_errors_stay_terse() {
    let app = TestApp::with_config(Config {
        environment: Environment::Production,
        ..test_config()
    });
    let user = app.create_user("Real Customer", Role::User).await;

    let response = app.get("/api/v1/tours/not-an-id", Some(&user.token)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["status"], "fail");
    assert::has_key(&response.body, "message");
    assert::lacks_key(&response.body, "error");
}

// =============================================================================
// Limits
// =============================================================================

#[tokio::test]
async fn api_requests_are_rate_limited_per_client() {
    let app = TestApp::with_config(Config {
        rate_limit_max: 2,
        ..test_config()
    });

    let from = |ip: &str| {
        Request::get("/api/v1/tours")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    let first = app.request(from("203.0.113.7")).await;
    assert_eq!(first.status, StatusCode::UNAUTHORIZED);
    assert_eq!(first.headers["x-ratelimit-limit"], "2");
    assert_eq!(first.headers["x-ratelimit-remaining"], "1");
    app.request(from("203.0.113.7")).await;

    let limited = app.request(from("203.0.113.7")).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert::failed_with(&limited.body, "fail", "Too many requests from this IP");
    assert!(limited.headers.contains_key(header::RETRY_AFTER));

    let other = app.request(from("198.51.100.1")).await;
    assert_eq!(other.status, StatusCode::UNAUTHORIZED);

    // Pages and health checks are not counted.
    let health = app.get("/health", None).await;
    assert_eq!(health.status, StatusCode::OK);
}

#[tokio::test]
async fn oversized_json_bodies_are_rejected() {
    let app = TestApp::new();
    let mut body = signup_body("Verbose Person", &unique_email("big"));
    body["bio"] = json!("x".repeat(20 * 1024));

    let response = app.post("/api/v1/users/signup", None, body).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert::failed_with(&response.body, "fail", "Request body is too large");
}

// =============================================================================
// Static files
// =============================================================================

#[tokio::test]
async fn static_files_are_served_without_traversal() {
    let app = TestApp::new();

    let css = app.get("/static/css/style.css", None).await;
    assert_eq!(css.status, StatusCode::OK);
    assert_eq!(css.headers[header::CONTENT_TYPE], "text/css");
    assert::contains(&css.text, ".card-container");

    let escape = app.get("/static/../Cargo.toml", None).await;
    assert_eq!(escape.status, StatusCode::NOT_FOUND);

    let missing = app.get("/static/css/nope.css", None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Pages
// =============================================================================

#[tokio::test]
async fn overview_lists_visible_tours_best_rated_first() {
    let app = TestApp::new();
    app.create_tour(tour("The Forest Hiker").rating(4.2, 3).build())
        .await;
    app.create_tour(tour("The Sea Explorer").rating(4.9, 8).build())
        .await;
    app.create_tour(tour("The Secret Hideaway").secret().build())
        .await;

    let page = app.get("/", None).await;
    assert_eq!(page.status, StatusCode::OK);
    assert::contains(&page.text, "Tourbook | All Tours");
    assert::contains(&page.text, "Log in");
    assert::not_contains(&page.text, "The Secret Hideaway");
    let sea = page.text.find("The Sea Explorer").unwrap();
    let forest = page.text.find("The Forest Hiker").unwrap();
    assert!(sea < forest);
}

#[tokio::test]
async fn tour_page_shows_details_and_missing_slugs_404() {
    let app = TestApp::new();
    let guide = app.create_user("Steven Miller", Role::LeadGuide).await;
    app.create_tour(
        tour("The Forest Hiker")
            .guides(&[guide.id])
            .with("description", json!("Into the woods"))
            .build(),
    )
    .await;

    let page = app.get("/tour/the-forest-hiker", None).await;
    assert_eq!(page.status, StatusCode::OK);
    assert::contains(&page.text, "Tourbook | The Forest Hiker Tour");
    assert::contains(&page.text, "Steven Miller");
    assert::contains(&page.text, "Lead guide");
    assert::contains(&page.text, "Log in to book tour");

    let missing = app.get("/tour/atlantis", None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert::contains(&missing.text, "There is no tour with that name.");
}

#[tokio::test]
async fn account_pages_need_a_session() {
    let app = TestApp::new();
    let user = app.create_user("Maria Lopez", Role::User).await;
    let cookie = format!("jwt={}", user.token);

    let anonymous = app.get("/me", None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert::contains(&anonymous.text, "You are not logged in!");

    let account = app.get_with_cookies("/me", &cookie).await;
    assert_eq!(account.status, StatusCode::OK);
    assert::contains(&account.text, "Maria Lopez");
    assert::contains(&account.text, &user.email);

    let login = app.get("/login", None).await;
    assert_eq!(login.status, StatusCode::OK);
    assert::contains(&login.text, "Log into your account");
}

#[tokio::test]
async fn account_form_updates_name_and_email() {
    let app = TestApp::new();
    let user = app.create_user("Maria Lopez", Role::User).await;

    let request = Request::post("/submit-user-data")
        .header(header::COOKIE, format!("jwt={}", user.token))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("name=Maria+Garcia&email=maria%40example.com"))
        .unwrap();
    let response = app.request(request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert::contains(&response.text, "Maria Garcia");
    assert::contains(&response.text, "maria@example.com");
}

#[tokio::test]
async fn booking_alert_is_passed_to_the_page() {
    let app = TestApp::new();
    let user = app.create_user("Happy Booker", Role::User).await;

    let page = app
        .get_with_cookies("/my-tours?alert=booking", &format!("jwt={}", user.token))
        .await;
    assert_eq!(page.status, StatusCode::OK);
    assert::contains(&page.text, "Tourbook | My Tours");
    assert::contains(&page.text, "data-alert=\"Your booking was successful!");
}
