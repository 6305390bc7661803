#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! [`TestApp`] drives the REAL router and state over an in-memory document
//! store, so every test gets an isolated database without external services.
//! Accounts are written straight to the store with a password hash computed
//! once per test binary; Argon2 is slow in debug builds.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use axum::response::Response;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use tourbook_kernel::auth::password;
use tourbook_kernel::models::{Role, Tour, User};
use tourbook_kernel::resource::handlers;
use tourbook_kernel::resource::to_document;
use tourbook_kernel::store::{Collection, DocumentStore, InMemoryStore};
use tourbook_kernel::theme::ThemeEngine;
use tourbook_kernel::{AppState, Config, build_router};
use tourbook_test_utils::{TEST_PASSWORD, unique_email};

static TEST_PASSWORD_HASH: LazyLock<String> =
    LazyLock::new(|| password::hash_password(TEST_PASSWORD).expect("hash test password"));

/// Workspace root; tests run from `crates/kernel/`.
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Development config pointing at the workspace templates and static files.
pub fn test_config() -> Config {
    let root = project_root();
    Config {
        templates_dir: root.join("templates"),
        static_dir: root.join("static"),
        ..Config::default()
    }
}

/// A signed-in account created for a test.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub token: String,
}

/// Status, headers and parsed body of a response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
    pub body: Value,
}

impl TestResponse {
    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read response body")
            .to_bytes();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self {
            status,
            headers,
            text,
            body,
        }
    }

    /// `name=value` pairs of every Set-Cookie header, joined for a Cookie header.
    pub fn cookies(&self) -> String {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|cookie| cookie.split(';').next())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Names of the documents in a listing's `data.<plural>` array.
    pub fn names(&self, plural: &str) -> Vec<String> {
        self.body["data"][plural]
            .as_array()
            .map(|docs| {
                docs.iter()
                    .filter_map(|d| d["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Test application wrapper using the REAL kernel routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let theme = ThemeEngine::new(&config.templates_dir).expect("load templates");
        let store = Arc::new(InMemoryStore::new());
        let state = AppState::from_parts(config, store.clone(), theme);
        let router = build_router(state.clone());
        Self {
            router,
            state,
            store,
        }
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        TestResponse::from_response(response).await
    }

    /// Send a JSON request, optionally as a signed-in user.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.request(builder.body(body).unwrap()).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.send(Method::GET, path, token, None).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.send(Method::POST, path, token, Some(body)).await
    }

    pub async fn patch(&self, path: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.send(Method::PATCH, path, token, Some(body)).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.send(Method::DELETE, path, token, None).await
    }

    /// GET with a Cookie header instead of a bearer token.
    pub async fn get_with_cookies(&self, path: &str, cookies: &str) -> TestResponse {
        let request = Request::get(path)
            .header(header::COOKIE, cookies)
            .body(Body::empty())
            .unwrap();
        self.request(request).await
    }

    /// Create an account with `role` directly in the store and sign a token for it.
    pub async fn create_user(&self, name: &str, role: Role) -> TestUser {
        let user = User {
            id: Uuid::now_v7(),
            name: name.to_string(),
            email: unique_email(&role.to_string()),
            photo: "default.jpg".to_string(),
            role,
            password: TEST_PASSWORD_HASH.clone(),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: Utc::now(),
        };
        self.store
            .insert(Collection::Users, to_document(&user).unwrap())
            .await
            .expect("insert test user");
        let token = self.state.tokens().sign(user.id).unwrap();
        TestUser {
            id: user.id,
            email: user.email,
            token,
        }
    }

    /// Create a tour through the resource layer and return its id.
    pub async fn create_tour(&self, body: Value) -> Uuid {
        let input = body.as_object().cloned().expect("tour body is an object");
        let tour = handlers::create::<Tour>(&self.state, &input)
            .await
            .expect("create test tour");
        tour.id
    }

    /// Current stored document of a tour, secret or not.
    pub async fn tour_doc(&self, id: Uuid) -> Value {
        self.store
            .find_by_id(Collection::Tours, id, &[])
            .await
            .unwrap()
            .expect("tour exists")
    }
}
