#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Tour listing, query features, analytics and geo search over the real
//! router.

use axum::http::StatusCode;
use serde_json::json;

use tourbook_kernel::models::Role;
use tourbook_test_utils::{assert, tour};

mod common;
use common::TestApp;

/// Four visible tours priced 300..900 and one secret tour.
async fn seed_catalog(app: &TestApp) {
    app.create_tour(tour("The Forest Hiker").price(300.0).difficulty("easy").build())
        .await;
    app.create_tour(tour("The Sea Explorer").price(500.0).difficulty("medium").build())
        .await;
    app.create_tour(tour("The Snow Adventurer").price(700.0).difficulty("difficult").build())
        .await;
    app.create_tour(tour("The City Wanderer").price(900.0).difficulty("easy").build())
        .await;
    app.create_tour(tour("The Secret Hideaway").price(100.0).secret().build())
        .await;
}

// =============================================================================
// Query features
// =============================================================================

#[tokio::test]
async fn listing_filters_sorts_and_paginates() {
    let app = TestApp::new();
    seed_catalog(&app).await;
    let user = app.create_user("Query Tester", Role::User).await;

    let first = app
        .get(
            "/api/v1/tours?price%5Bgte%5D=500&sort=-price,name&limit=2&page=1",
            Some(&user.token),
        )
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["status"], "success");
    assert_eq!(first.body["results"], 2);
    assert_eq!(first.body["total"], 3);
    assert_eq!(first.names("tours"), ["The City Wanderer", "The Snow Adventurer"]);

    let second = app
        .get(
            "/api/v1/tours?price%5Bgte%5D=500&sort=-price,name&limit=2&page=2",
            Some(&user.token),
        )
        .await;
    assert_eq!(second.names("tours"), ["The Sea Explorer"]);

    let past_the_end = app
        .get("/api/v1/tours?limit=2&page=9", Some(&user.token))
        .await;
    assert_eq!(past_the_end.status, StatusCode::OK);
    assert_eq!(past_the_end.body["results"], 0);
}

#[tokio::test]
async fn range_and_equality_filters_combine() {
    let app = TestApp::new();
    seed_catalog(&app).await;
    let user = app.create_user("Filter Tester", Role::User).await;

    let response = app
        .get(
            "/api/v1/tours?difficulty=easy&price%5Blte%5D=500&sort=price",
            Some(&user.token),
        )
        .await;
    assert_eq!(response.names("tours"), ["The Forest Hiker"]);

    // Repeated whitelisted keys become an any-of match.
    let response = app
        .get(
            "/api/v1/tours?difficulty=easy&difficulty=medium&sort=price",
            Some(&user.token),
        )
        .await;
    assert_eq!(
        response.names("tours"),
        ["The Forest Hiker", "The Sea Explorer", "The City Wanderer"]
    );
}

#[tokio::test]
async fn unknown_fields_and_malformed_paging_are_ignored() {
    let app = TestApp::new();
    seed_catalog(&app).await;
    let user = app.create_user("Lenient Tester", Role::User).await;

    let response = app
        .get(
            "/api/v1/tours?colour=blue&price%5Bnear%5D=3&page=abc&limit=-4&sort=bogus",
            Some(&user.token),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["results"], 4);
}

#[tokio::test]
async fn field_projection_keeps_id() {
    let app = TestApp::new();
    seed_catalog(&app).await;
    let user = app.create_user("Projection Tester", Role::User).await;

    let response = app
        .get("/api/v1/tours?fields=name,price&sort=price", Some(&user.token))
        .await;
    let first = &response.body["data"]["tours"][0];
    assert_eq!(first["name"], "The Forest Hiker");
    assert::has_key(first, "id");
    assert::has_key(first, "price");
    assert::lacks_key(first, "summary");
    assert::lacks_key(first, "difficulty");

    let response = app
        .get("/api/v1/tours?fields=-summary", Some(&user.token))
        .await;
    let first = &response.body["data"]["tours"][0];
    assert::lacks_key(first, "summary");
    assert::has_key(first, "name");
}

#[tokio::test]
async fn secret_tours_stay_hidden() {
    let app = TestApp::new();
    seed_catalog(&app).await;
    let user = app.create_user("Secret Seeker", Role::User).await;

    let listing = app.get("/api/v1/tours", Some(&user.token)).await;
    assert!(!listing.names("tours").contains(&"The Secret Hideaway".to_string()));

    let cheap = app
        .get("/api/v1/tours?price%5Blt%5D=200", Some(&user.token))
        .await;
    assert_eq!(cheap.body["results"], 0);
}

#[tokio::test]
async fn top_five_alias_limits_and_projects() {
    let app = TestApp::new();
    seed_catalog(&app).await;
    app.create_tour(tour("The Wine Taster").price(650.0).rating(4.9, 12).build())
        .await;
    app.create_tour(tour("The Star Gazer").price(250.0).rating(4.9, 3).build())
        .await;
    let user = app.create_user("Alias Tester", Role::User).await;

    let response = app
        .get("/api/v1/tours/top-five-tours", Some(&user.token))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["results"], 5);
    let names = response.names("tours");
    assert_eq!(&names[..2], ["The Star Gazer", "The Wine Taster"]);
    assert::lacks_key(&response.body["data"]["tours"][0], "difficulty");
}

// =============================================================================
// Resource handlers
// =============================================================================

#[tokio::test]
async fn fetching_by_id_handles_missing_and_malformed_ids() {
    let app = TestApp::new();
    let id = app
        .create_tour(tour("The Park Camper").price(150.0).build())
        .await;
    let user = app.create_user("Fetch Tester", Role::User).await;

    let found = app.get(&format!("/api/v1/tours/{id}"), Some(&user.token)).await;
    assert_eq!(found.status, StatusCode::OK);
    assert_eq!(found.body["data"]["tour"]["slug"], "the-park-camper");
    assert_eq!(found.body["data"]["tour"]["duration_weeks"], json!(5.0 / 7.0));

    let missing = app
        .get(
            &format!("/api/v1/tours/{}", uuid::Uuid::now_v7()),
            Some(&user.token),
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert::failed_with(&missing.body, "fail", "No tour found with that ID");

    let malformed = app.get("/api/v1/tours/not-an-id", Some(&user.token)).await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn managers_create_update_and_delete_tours() {
    let app = TestApp::new();
    let lead = app.create_user("Lead Guide", Role::LeadGuide).await;

    let created = app
        .post(
            "/api/v1/tours",
            Some(&lead.token),
            tour("The Northern Lights").price(1497.0).build(),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let id = created.body["data"]["tour"]["id"].as_str().unwrap().to_string();
    assert_eq!(created.body["data"]["tour"]["ratings_average"], 4.5);

    let updated = app
        .patch(
            &format!("/api/v1/tours/{id}"),
            Some(&lead.token),
            json!({ "price": 1297.0 }),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["data"]["tour"]["price"], 1297.0);
    assert_eq!(updated.body["data"]["tour"]["name"], "The Northern Lights");

    let deleted = app.delete(&format!("/api/v1/tours/{id}"), Some(&lead.token)).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    assert!(deleted.text.is_empty());

    let gone = app.get(&format!("/api/v1/tours/{id}"), Some(&lead.token)).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_and_duplicate_tours_are_rejected() {
    let app = TestApp::new();
    let admin = app.create_user("Site Admin", Role::Admin).await;

    let invalid = app
        .post(
            "/api/v1/tours",
            Some(&admin.token),
            json!({ "name": "Short", "price": -3 }),
        )
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert::failed_with(&invalid.body, "fail", "Invalid input data.");
    assert::has_key(&invalid.body, "errors");

    let body = tour("The Desert Nomad").build();
    let first = app.post("/api/v1/tours", Some(&admin.token), body.clone()).await;
    assert_eq!(first.status, StatusCode::CREATED);
    let second = app.post("/api/v1/tours", Some(&admin.token), body).await;
    assert_eq!(second.status, StatusCode::CONFLICT);
    assert::failed_with(&second.body, "fail", "Duplicate field value");
}

#[tokio::test]
async fn operator_keys_in_bodies_are_dropped() {
    let app = TestApp::new();
    let admin = app.create_user("Site Admin", Role::Admin).await;

    let created = app
        .post(
            "/api/v1/tours",
            Some(&admin.token),
            tour("The Marsh Walker")
                .with("$where", json!("1 == 1"))
                .with("summary", json!("<script>alert(1)</script>Muddy boots"))
                .build(),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let doc = &created.body["data"]["tour"];
    assert::lacks_key(doc, "$where");
    assert::not_contains(doc["summary"].as_str().unwrap(), "<script>");
}

// =============================================================================
// Analytics and geo search
// =============================================================================

#[tokio::test]
async fn stats_group_highly_rated_tours_by_difficulty() {
    let app = TestApp::new();
    app.create_tour(tour("The Forest Hiker").price(300.0).rating(4.8, 10).build())
        .await;
    app.create_tour(tour("The City Wanderer").price(500.0).rating(4.6, 6).build())
        .await;
    app.create_tour(
        tour("The Snow Adventurer")
            .price(900.0)
            .difficulty("difficult")
            .rating(4.7, 4)
            .build(),
    )
    .await;
    app.create_tour(tour("The Low Rated Trip").price(50.0).rating(3.0, 2).build())
        .await;
    let user = app.create_user("Stats Reader", Role::User).await;

    let response = app.get("/api/v1/tours/tour-stats", Some(&user.token)).await;
    assert_eq!(response.status, StatusCode::OK);
    let stats = response.body["data"]["stats"].as_array().unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0]["difficulty"], "EASY");
    assert_eq!(stats[0]["num_tours"], 2);
    assert_eq!(stats[0]["num_ratings"], 16);
    assert_eq!(stats[0]["avg_price"], 400.0);
    assert_eq!(stats[0]["min_price"], 300.0);
    assert_eq!(stats[1]["difficulty"], "DIFFICULT");
}

#[tokio::test]
async fn monthly_plan_is_limited_to_staff() {
    let app = TestApp::new();
    app.create_tour(
        tour("The Forest Hiker")
            .starts(&["2021-04-25T09:00:00Z", "2021-07-20T09:00:00Z"])
            .build(),
    )
    .await;
    app.create_tour(
        tour("The Sea Explorer")
            .starts(&["2021-07-01T09:00:00Z", "2022-07-01T09:00:00Z"])
            .build(),
    )
    .await;
    let guide = app.create_user("Tour Guide", Role::Guide).await;
    let user = app.create_user("Plain User", Role::User).await;

    let forbidden = app
        .get("/api/v1/tours/monthly-plan/2021", Some(&user.token))
        .await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

    let response = app
        .get("/api/v1/tours/monthly-plan/2021", Some(&guide.token))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["results"], 2);
    let plan = &response.body["data"]["plan"];
    assert_eq!(plan[0]["month"], 7);
    assert_eq!(plan[0]["num_tour_starts"], 2);
    assert_eq!(plan[1]["month"], 4);

    let bad_year = app
        .get("/api/v1/tours/monthly-plan/someday", Some(&guide.token))
        .await;
    assert_eq!(bad_year.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn geo_search_finds_and_ranks_nearby_tours() {
    let app = TestApp::new();
    // Around Los Angeles and one in New York.
    app.create_tour(tour("The Beach Stroller").starting_at(34.01, -118.49).build())
        .await;
    app.create_tour(tour("The Canyon Climber").starting_at(34.14, -118.05).build())
        .await;
    app.create_tour(tour("The Big Apple Tour").starting_at(40.71, -74.0).build())
        .await;
    let user = app.create_user("Geo Tester", Role::User).await;

    let within = app
        .get(
            "/api/v1/tours/tours-within/100/center/34.05,-118.24/unit/mi",
            Some(&user.token),
        )
        .await;
    assert_eq!(within.status, StatusCode::OK);
    assert_eq!(within.body["results"], 2);

    let ranked = app
        .get(
            "/api/v1/tours/distances/34.05,-118.24/unit/km",
            Some(&user.token),
        )
        .await;
    let distances = ranked.body["data"]["distances"].as_array().unwrap();
    assert_eq!(distances.len(), 3);
    assert_eq!(distances[2]["name"], "The Big Apple Tour");
    assert!(distances[2]["distance"].as_f64().unwrap() > 3000.0);

    let malformed = app
        .get("/api/v1/tours/distances/north/unit/km", Some(&user.token))
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert::failed_with(
        &malformed.body,
        "fail",
        "Please provide latitude and longitude in the format lat,lng.",
    );
}
