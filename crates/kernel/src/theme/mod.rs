//! Tera templates for pages and emails.

mod engine;

pub use engine::ThemeEngine;
