//! Tourbook test utilities.
//!
//! Request-body fixtures and assertion helpers shared by the kernel's
//! integration tests.

use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Password used by every fixture account.
pub const TEST_PASSWORD: &str = "test1234";

/// Start building a tour creation body.
///
/// Tour names may only contain letters and spaces and must be 10 to 45
/// characters long.
pub fn tour(name: &str) -> TourFixture {
    TourFixture {
        fields: json!({
            "name": name,
            "duration": 5,
            "max_group_size": 10,
            "difficulty": "easy",
            "price": 497.0,
            "summary": "Breathtaking hike through the mountains",
            "image_cover": "tour-cover.jpg",
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    }
}

/// Builder for `POST /api/v1/tours` bodies.
#[derive(Debug, Clone)]
pub struct TourFixture {
    fields: Map<String, Value>,
}

impl TourFixture {
    pub fn price(self, price: f64) -> Self {
        self.with("price", json!(price))
    }

    pub fn duration(self, days: u32) -> Self {
        self.with("duration", json!(days))
    }

    pub fn difficulty(self, difficulty: &str) -> Self {
        self.with("difficulty", json!(difficulty))
    }

    pub fn rating(self, average: f64, quantity: u32) -> Self {
        self.with("ratings_average", json!(average))
            .with("ratings_quantity", json!(quantity))
    }

    /// Hide the tour from every listing.
    pub fn secret(self) -> Self {
        self.with("secret_tour", json!(true))
    }

    /// Start location as `(latitude, longitude)`.
    pub fn starting_at(self, lat: f64, lng: f64) -> Self {
        self.with(
            "start_location",
            json!({ "type": "Point", "coordinates": [lng, lat], "description": "Start" }),
        )
    }

    /// Start dates as RFC 3339 strings.
    pub fn starts(self, dates: &[&str]) -> Self {
        self.with("start_dates", json!(dates))
    }

    pub fn guides(self, guides: &[Uuid]) -> Self {
        let ids: Vec<String> = guides.iter().map(Uuid::to_string).collect();
        self.with("guides", json!(ids))
    }

    /// Set any other field.
    pub fn with(mut self, field: &str, value: Value) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Body for `POST /api/v1/users/signup`.
pub fn signup_body(name: &str, email: &str) -> Value {
    json!({
        "name": name,
        "email": email,
        "password": TEST_PASSWORD,
        "password_confirm": TEST_PASSWORD,
    })
}

/// Body for `POST /api/v1/users/login`.
pub fn login_body(email: &str) -> Value {
    json!({ "email": email, "password": TEST_PASSWORD })
}

/// Body for a review; `tour` is filled from the path on nested routes.
pub fn review_body(text: &str, rating: u8) -> Value {
    json!({ "review": text, "rating": rating })
}

/// A fresh address so fixtures never collide on the unique email index.
pub fn unique_email(prefix: &str) -> String {
    format!("{prefix}-{}@example.com", Uuid::now_v7().simple())
}

/// Assertion helpers for JSON responses.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert that a JSON value does not expose a key.
    pub fn lacks_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_none(),
            "Expected JSON to NOT have key '{key}', got: {value}"
        );
    }

    /// Assert the standard failure envelope.
    pub fn failed_with(body: &Value, status: &str, message: &str) {
        assert_eq!(body["status"], status, "unexpected status in {body}");
        let actual = body["message"].as_str().unwrap_or_default();
        assert!(
            actual.contains(message),
            "Expected message containing '{message}'\nActual: {actual}"
        );
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that a string does not contain a substring.
    pub fn not_contains(haystack: &str, needle: &str) {
        assert!(
            !haystack.contains(needle),
            "Expected string to NOT contain '{needle}'\nActual: {haystack}"
        );
    }
}
