#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Auth Gate and account flows: tokens, cookies, roles, staleness, soft
//! deletion and password reset.

use axum::http::{StatusCode, header};
use chrono::{Duration, Utc};
use serde_json::json;

use tourbook_kernel::models::Role;
use tourbook_test_utils::{TEST_PASSWORD, assert, login_body, signup_body, tour, unique_email};

mod common;
use common::TestApp;

// =============================================================================
// Signup, login and cookies
// =============================================================================

#[tokio::test]
async fn signup_issues_token_and_cookie() {
    let app = TestApp::new();
    let email = unique_email("laura");

    let mut body = signup_body("Laura Wilson", &email);
    body["role"] = json!("admin");
    let response = app.post("/api/v1/users/signup", None, body).await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.body["token"].as_str().is_some_and(|t| !t.is_empty()));
    let user = &response.body["data"]["user"];
    assert_eq!(user["email"], email.as_str());
    // Roles cannot be chosen at signup.
    assert_eq!(user["role"], "user");
    assert::lacks_key(user, "password");
    assert::lacks_key(user, "active");

    let cookie = response
        .headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert::contains(cookie, "jwt=");
    assert::contains(cookie, "HttpOnly");

    let welcome = app.state.email().outbox_messages();
    assert_eq!(welcome.len(), 1);
    assert_eq!(welcome[0].to, email);
}

#[tokio::test]
async fn login_cookie_authenticates_until_logout() {
    let app = TestApp::new();
    let user = app.create_user("Cookie Monster", Role::User).await;

    let login = app
        .post("/api/v1/users/login", None, login_body(&user.email))
        .await;
    assert_eq!(login.status, StatusCode::OK);
    let cookies = login.cookies();
    assert::contains(&cookies, "jwt=");

    let me = app.get_with_cookies("/api/v1/users/me", &cookies).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["data"]["user"]["name"], "Cookie Monster");

    let logout = app.get("/api/v1/users/logout", None).await;
    assert_eq!(logout.status, StatusCode::OK);
    let cleared = logout.cookies();
    assert_eq!(cleared, "jwt=loggedout");

    let after = app.get_with_cookies("/api/v1/users/me", &cleared).await;
    assert_eq!(after.status, StatusCode::UNAUTHORIZED);
    assert::failed_with(&after.body, "fail", "You are not logged in!");
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let app = TestApp::new();
    let user = app.create_user("Careful Typist", Role::User).await;

    let missing = app
        .post("/api/v1/users/login", None, json!({ "email": user.email }))
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert::failed_with(&missing.body, "fail", "Please provide email and password!");

    let wrong = app
        .post(
            "/api/v1/users/login",
            None,
            json!({ "email": user.email, "password": "not-the-password" }),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert::failed_with(&wrong.body, "fail", "Incorrect email or password");

    let unknown = app
        .post("/api/v1/users/login", None, login_body("nobody@example.com"))
        .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert::failed_with(&unknown.body, "fail", "Incorrect email or password");
}

// =============================================================================
// Gate checks
// =============================================================================

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = TestApp::new();

    let anonymous = app.get("/api/v1/tours", None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert::failed_with(
        &anonymous.body,
        "fail",
        "You are not logged in! Please log in to get access.",
    );

    let forged = app.get("/api/v1/tours", Some("not.a.token")).await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
    assert::failed_with(&forged.body, "fail", "Invalid token. Please log in again!");
}

#[tokio::test]
async fn expired_tokens_are_rejected() {
    let app = TestApp::new();
    let user = app.create_user("Old Timer", Role::User).await;
    let expired = app
        .state
        .tokens()
        .sign_at(user.id, Utc::now() - Duration::days(365))
        .unwrap();

    let response = app.get("/api/v1/users/me", Some(&expired)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert::failed_with(&response.body, "fail", "Your token has expired!");
}

#[tokio::test]
async fn roles_decide_access() {
    let app = TestApp::new();
    let user = app.create_user("Plain User", Role::User).await;
    let guide = app.create_user("Tour Guide", Role::Guide).await;
    let lead = app.create_user("Lead Guide", Role::LeadGuide).await;

    let body = tour("The Forest Hiker").build();
    for token in [&user.token, &guide.token] {
        let response = app.post("/api/v1/tours", Some(token), body.clone()).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert::failed_with(
            &response.body,
            "fail",
            "You do not have permission to perform this action",
        );
    }

    let allowed = app.post("/api/v1/tours", Some(&lead.token), body).await;
    assert_eq!(allowed.status, StatusCode::CREATED);

    // Account administration is for admins only.
    let users = app.get("/api/v1/users", Some(&lead.token)).await;
    assert_eq!(users.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn password_change_invalidates_older_tokens() {
    let app = TestApp::new();
    let user = app.create_user("Security Minded", Role::User).await;
    let older = app
        .state
        .tokens()
        .sign_at(user.id, Utc::now() - Duration::hours(1))
        .unwrap();

    let wrong_current = app
        .patch(
            "/api/v1/users/update-my-password",
            Some(&user.token),
            json!({
                "password_current": "guess1234",
                "password": "newpass1234",
                "password_confirm": "newpass1234",
            }),
        )
        .await;
    assert_eq!(wrong_current.status, StatusCode::UNAUTHORIZED);
    assert::failed_with(&wrong_current.body, "fail", "Your current password is wrong.");

    let changed = app
        .patch(
            "/api/v1/users/update-my-password",
            Some(&user.token),
            json!({
                "password_current": TEST_PASSWORD,
                "password": "newpass1234",
                "password_confirm": "newpass1234",
            }),
        )
        .await;
    assert_eq!(changed.status, StatusCode::OK);
    let fresh = changed.body["token"].as_str().unwrap().to_string();

    let stale = app.get("/api/v1/users/me", Some(&older)).await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    assert::failed_with(
        &stale.body,
        "fail",
        "User recently changed password! Please log in again.",
    );

    let current = app.get("/api/v1/users/me", Some(&fresh)).await;
    assert_eq!(current.status, StatusCode::OK);
}

#[tokio::test]
async fn token_issued_moments_before_password_change_is_stale() {
    let app = TestApp::new();
    let user = app.create_user("Quick Changer", Role::User).await;
    let just_before = app.state.tokens().sign_at(user.id, Utc::now()).unwrap();

    let changed = app
        .patch(
            "/api/v1/users/update-my-password",
            Some(&just_before),
            json!({
                "password_current": TEST_PASSWORD,
                "password": "newpass1234",
                "password_confirm": "newpass1234",
            }),
        )
        .await;
    assert_eq!(changed.status, StatusCode::OK);
    let fresh = changed.body["token"].as_str().unwrap().to_string();

    for stale_token in [&just_before, &user.token] {
        let stale = app.get("/api/v1/users/me", Some(stale_token)).await;
        assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
        assert::failed_with(
            &stale.body,
            "fail",
            "User recently changed password! Please log in again.",
        );
    }

    let current = app.get("/api/v1/users/me", Some(&fresh)).await;
    assert_eq!(current.status, StatusCode::OK);
}

#[tokio::test]
async fn deactivated_accounts_lose_access() {
    let app = TestApp::new();
    let admin = app.create_user("Site Admin", Role::Admin).await;
    let user = app.create_user("Leaving Soon", Role::User).await;

    let deleted = app.delete("/api/v1/users/delete-me", Some(&user.token)).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let after = app.get("/api/v1/users/me", Some(&user.token)).await;
    assert_eq!(after.status, StatusCode::UNAUTHORIZED);
    assert::failed_with(
        &after.body,
        "fail",
        "The user belonging to this token no longer exists.",
    );

    let listing = app.get("/api/v1/users", Some(&admin.token)).await;
    assert_eq!(listing.status, StatusCode::OK);
    assert!(!listing.names("users").contains(&"Leaving Soon".to_string()));

    let login = app
        .post("/api/v1/users/login", None, login_body(&user.email))
        .await;
    assert_eq!(login.status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Profile updates
// =============================================================================

#[tokio::test]
async fn update_me_changes_only_profile_fields() {
    let app = TestApp::new();
    let user = app.create_user("Jonas Schmedtmann", Role::User).await;

    let refused = app
        .patch(
            "/api/v1/users/update-me",
            Some(&user.token),
            json!({ "password": "sneaky123", "password_confirm": "sneaky123" }),
        )
        .await;
    assert_eq!(refused.status, StatusCode::BAD_REQUEST);
    assert::failed_with(&refused.body, "fail", "This route is not for password updates.");

    let updated = app
        .patch(
            "/api/v1/users/update-me",
            Some(&user.token),
            json!({ "name": "Jonas S", "email": "JONAS@Example.com", "role": "admin" }),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    let doc = &updated.body["data"]["user"];
    assert_eq!(doc["name"], "Jonas S");
    assert_eq!(doc["email"], "jonas@example.com");
    assert_eq!(doc["role"], "user");
}

// =============================================================================
// Password reset
// =============================================================================

#[tokio::test]
async fn password_reset_round_trip() {
    let app = TestApp::new();
    let user = app.create_user("Forgetful Fred", Role::User).await;

    let unknown = app
        .post(
            "/api/v1/users/forgot-password",
            None,
            json!({ "email": "ghost@example.com" }),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    assert::failed_with(&unknown.body, "fail", "There is no user with email address.");

    let sent = app
        .post(
            "/api/v1/users/forgot-password",
            None,
            json!({ "email": user.email.to_uppercase() }),
        )
        .await;
    assert_eq!(sent.status, StatusCode::OK);
    assert_eq!(sent.body["message"], "Token sent to email!");

    let messages = app.state.email().outbox_messages();
    let reset_mail = messages.last().unwrap();
    assert_eq!(reset_mail.to, user.email);
    let token = reset_mail
        .text
        .split("/reset-password/")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap()
        .to_string();

    let mismatched = app
        .patch(
            &format!("/api/v1/users/reset-password/{token}"),
            None,
            json!({ "password": "brandnew123", "password_confirm": "different1" }),
        )
        .await;
    assert_eq!(mismatched.status, StatusCode::BAD_REQUEST);

    let reset = app
        .patch(
            &format!("/api/v1/users/reset-password/{token}"),
            None,
            json!({ "password": "brandnew123", "password_confirm": "brandnew123" }),
        )
        .await;
    assert_eq!(reset.status, StatusCode::OK);
    assert!(reset.body["token"].is_string());

    let reused = app
        .patch(
            &format!("/api/v1/users/reset-password/{token}"),
            None,
            json!({ "password": "another123", "password_confirm": "another123" }),
        )
        .await;
    assert_eq!(reused.status, StatusCode::BAD_REQUEST);
    assert::failed_with(&reused.body, "fail", "Token is invalid or has expired");

    let login = app
        .post(
            "/api/v1/users/login",
            None,
            json!({ "email": user.email, "password": "brandnew123" }),
        )
        .await;
    assert_eq!(login.status, StatusCode::OK);
}
