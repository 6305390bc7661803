//! Tourbook kernel library.
//!
//! Exposes the application pieces to the `tourbook` binary and to the
//! integration tests.

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod query;
pub mod resource;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod theme;

pub use app::build_router;
pub use config::Config;
pub use state::AppState;
