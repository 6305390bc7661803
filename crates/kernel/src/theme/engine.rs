//! Theme engine over Tera.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::DateTime;
use tera::Tera;
use tracing::debug;

/// Loads every `*.html` template below a directory.
pub struct ThemeEngine {
    tera: Tera,
}

impl ThemeEngine {
    pub fn new(template_dir: &Path) -> Result<Self> {
        let pattern = template_dir.join("**/*.html");
        let pattern_str = pattern
            .to_str()
            .context("invalid template directory path")?;

        let mut tera = Tera::new(pattern_str).context("failed to initialize Tera templates")?;
        Self::register_filters(&mut tera);

        debug!(count = tera.get_template_names().count(), "loaded templates");
        Ok(Self { tera })
    }

    /// A theme engine with no templates (for testing).
    pub fn empty() -> Self {
        let mut tera = Tera::default();
        Self::register_filters(&mut tera);
        Self { tera }
    }

    fn register_filters(tera: &mut Tera) {
        // RFC 3339 timestamp -> "June 2024"
        tera.register_filter(
            "month_year",
            |value: &tera::Value, _args: &HashMap<String, tera::Value>| {
                let text = tera::try_get_value!("month_year", "value", String, value);
                let formatted = DateTime::parse_from_rfc3339(&text)
                    .map(|dt| dt.format("%B %Y").to_string())
                    .unwrap_or_default();
                Ok(tera::Value::String(formatted))
            },
        );

        // First word of a name, for greetings.
        tera.register_filter(
            "first_name",
            |value: &tera::Value, _args: &HashMap<String, tera::Value>| {
                let text = tera::try_get_value!("first_name", "value", String, value);
                let first = text.split_whitespace().next().unwrap_or_default();
                Ok(tera::Value::String(first.to_string()))
            },
        );
    }

    pub fn tera(&self) -> &Tera {
        &self.tera
    }

    /// Add a template at runtime (tests and embedded fallbacks).
    pub fn add_raw_template(&mut self, name: &str, content: &str) -> Result<()> {
        self.tera
            .add_raw_template(name, content)
            .with_context(|| format!("failed to add template {name}"))
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    pub fn render(&self, template: &str, context: &tera::Context) -> Result<String> {
        self.tera
            .render(template, context)
            .with_context(|| format!("failed to render template {template}"))
    }
}

impl std::fmt::Debug for ThemeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeEngine")
            .field("templates", &self.tera.get_template_names().count())
            .finish()
    }
}
