//! Configuration loaded from environment variables.
//!
//! Loaded once at startup and shared immutably through [`AppState`](crate::AppState).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment mode (default: development).
    pub environment: Environment,

    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL. When None, the in-memory store is used.
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Redis connection URL for shared rate-limit counters.
    pub redis_url: Option<String>,

    /// HMAC secret for session tokens.
    pub jwt_secret: String,

    /// Session token lifetime.
    pub jwt_expires_in: Duration,

    /// Lifetime of the `jwt` cookie.
    pub jwt_cookie_expires_in: Duration,

    /// Public site URL for constructing links in emails and checkout redirects.
    pub site_url: String,

    /// Path to static assets (default: ./static).
    pub static_dir: PathBuf,

    /// Path to Tera templates (default: ./templates).
    pub templates_dir: PathBuf,

    /// Maximum JSON body size in bytes (default: 10 KB).
    pub body_limit_bytes: usize,

    /// Maximum multipart upload size in bytes (default: 10 MB).
    pub upload_limit_bytes: usize,

    /// Requests allowed per client in one rate-limit window (default: 100).
    pub rate_limit_max: u32,

    /// Rate-limit window (default: one hour).
    pub rate_limit_window: Duration,

    /// SMTP host for email delivery. When None, email is disabled.
    pub smtp_host: Option<String>,

    /// SMTP port (default: 587).
    pub smtp_port: u16,

    /// SMTP username for authentication.
    pub smtp_username: Option<String>,

    /// SMTP password for authentication.
    pub smtp_password: Option<String>,

    /// SMTP encryption mode: "starttls" (default), "tls", or "none".
    pub smtp_encryption: String,

    /// From address for outgoing email.
    pub email_from: String,

    /// Stripe secret key. When None, checkout is unavailable.
    pub stripe_secret_key: Option<String>,

    /// Stripe webhook signing secret.
    pub stripe_webhook_secret: Option<String>,

    /// Base URL of the payment provider API.
    pub stripe_api_base: String,
}

const DEV_JWT_SECRET: &str = "development-only-secret-change-me-please-0123456789";
const DAY: u64 = 24 * 60 * 60;

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            port: 3000,
            database_url: None,
            database_max_connections: 10,
            redis_url: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_expires_in: Duration::from_secs(90 * DAY),
            jwt_cookie_expires_in: Duration::from_secs(90 * DAY),
            site_url: "http://localhost:3000".to_string(),
            static_dir: PathBuf::from("./static"),
            templates_dir: PathBuf::from("./templates"),
            body_limit_bytes: 10 * 1024,
            upload_limit_bytes: 10 * 1024 * 1024,
            rate_limit_max: 100,
            rate_limit_window: Duration::from_secs(60 * 60),
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_encryption: "starttls".to_string(),
            email_from: "Tourbook <hello@tourbook.local>".to_string(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: "https://api.stripe.com".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let environment = env::var("APP_ENV")
            .map(|v| Environment::parse(&v))
            .unwrap_or(defaults.environment);

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.is_empty());

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if environment == Environment::Production => {
                bail!("JWT_SECRET environment variable is required in production")
            }
            Err(_) => defaults.jwt_secret,
        };
        if environment == Environment::Production && jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 bytes in production");
        }

        let jwt_expires_in = days_var("JWT_EXPIRES_IN_DAYS", 90)?;
        let jwt_cookie_expires_in = days_var("JWT_COOKIE_EXPIRES_IN_DAYS", 90)?;

        let site_url = env::var("SITE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let static_dir = env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);

        let templates_dir = env::var("TEMPLATES_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.templates_dir);

        let body_limit_bytes = env::var("BODY_LIMIT_BYTES")
            .unwrap_or_else(|_| defaults.body_limit_bytes.to_string())
            .parse()
            .context("BODY_LIMIT_BYTES must be a valid usize")?;

        let upload_limit_bytes = env::var("UPLOAD_LIMIT_BYTES")
            .unwrap_or_else(|_| defaults.upload_limit_bytes.to_string())
            .parse()
            .context("UPLOAD_LIMIT_BYTES must be a valid usize")?;

        let rate_limit_max = env::var("RATE_LIMIT_MAX")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .context("RATE_LIMIT_MAX must be a valid u32")?;

        let rate_limit_window = env::var("RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .map(Duration::from_secs)
            .context("RATE_LIMIT_WINDOW_SECS must be a valid u64")?;

        let smtp_host = env::var("SMTP_HOST").ok();

        let smtp_port = env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()
            .context("SMTP_PORT must be a valid u16")?;

        let smtp_username = env::var("SMTP_USERNAME").ok();
        let smtp_password = env::var("SMTP_PASSWORD").ok();

        let smtp_encryption = env::var("SMTP_ENCRYPTION")
            .unwrap_or_else(|_| "starttls".to_string())
            .to_lowercase();

        let email_from = env::var("EMAIL_FROM").unwrap_or(defaults.email_from);

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").ok().filter(|v| !v.is_empty());
        let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET")
            .ok()
            .filter(|v| !v.is_empty());
        let stripe_api_base = env::var("STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base);

        Ok(Self {
            environment,
            port,
            database_url,
            database_max_connections,
            redis_url,
            jwt_secret,
            jwt_expires_in,
            jwt_cookie_expires_in,
            site_url,
            static_dir,
            templates_dir,
            body_limit_bytes,
            upload_limit_bytes,
            rate_limit_max,
            rate_limit_window,
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            smtp_encryption,
            email_from,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_api_base,
        })
    }

    /// True when running with production error handling and secure cookies.
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn days_var(name: &str, default: u64) -> Result<Duration> {
    let days: u64 = env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("{name} must be a whole number of days"))?;
    Ok(Duration::from_secs(days * DAY))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse("PROD"), Environment::Production);
        assert_eq!(Environment::parse("development"), Environment::Development);
        assert_eq!(Environment::parse("staging"), Environment::Development);
    }

    #[test]
    fn defaults_match_edge_limits() {
        let config = Config::default();
        assert_eq!(config.body_limit_bytes, 10 * 1024);
        assert_eq!(config.rate_limit_max, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(3600));
        assert!(!config.is_production());
        assert!(config.database_url.is_none());
    }
}
