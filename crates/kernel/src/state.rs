//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use redis::Client as RedisClient;
use tracing::{info, warn};

use crate::auth::TokenService;
use crate::config::Config;
use crate::db;
use crate::middleware::RateLimiter;
use crate::services::email::EmailService;
use crate::services::images::ImageProcessor;
use crate::services::payments::CheckoutService;
use crate::store::{DocumentStore, InMemoryStore, PostgresStore};
use crate::theme::ThemeEngine;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Immutable configuration loaded at startup.
    config: Arc<Config>,

    /// Document storage for every resource collection.
    store: Arc<dyn DocumentStore>,

    /// Session token signing and verification.
    tokens: TokenService,

    /// Tera templates for pages and emails.
    theme: Arc<ThemeEngine>,

    /// Outgoing email.
    email: Arc<EmailService>,

    /// Payment checkout (None when no provider key is configured).
    payments: Option<Arc<CheckoutService>>,

    /// Upload resizing into the static directory.
    images: ImageProcessor,

    /// Per-client API rate limiter.
    rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Create application state, connecting to the configured backends.
    ///
    /// Without `DATABASE_URL` documents live in memory and are lost on
    /// restart; without `REDIS_URL` rate-limit counters are per process.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match &config.database_url {
            Some(url) => {
                let pool = db::create_pool(url, config.database_max_connections)
                    .await
                    .context("failed to create database pool")?;
                db::run_migrations(&pool)
                    .await
                    .context("failed to run migrations")?;
                info!("using PostgreSQL document store");
                Arc::new(PostgresStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set; documents are kept in memory only");
                Arc::new(InMemoryStore::new())
            }
        };

        let rate_limiter = match &config.redis_url {
            Some(url) => {
                let redis = RedisClient::open(url.as_str())
                    .context("failed to create Redis client")?;
                let mut conn = redis
                    .get_multiplexed_async_connection()
                    .await
                    .context("failed to connect to Redis")?;
                redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .context("Redis PING failed")?;
                info!("rate-limit counters shared through Redis");
                RateLimiter::redis(redis, config.rate_limit_max, config.rate_limit_window)
            }
            None => RateLimiter::in_process(config.rate_limit_max, config.rate_limit_window),
        };

        let theme = Arc::new(
            ThemeEngine::new(&config.templates_dir).context("failed to load templates")?,
        );
        let email = EmailService::from_config(config, theme.clone())
            .context("failed to configure email")?;

        Ok(Self::assemble(
            config.clone(),
            store,
            theme,
            email,
            rate_limiter,
        ))
    }

    /// State over an existing store, with mail kept in the outbox and
    /// in-process rate limiting. Used by tests and tooling.
    pub fn from_parts(config: Config, store: Arc<dyn DocumentStore>, theme: ThemeEngine) -> Self {
        let theme = Arc::new(theme);
        let email = EmailService::outbox(config.site_url.clone(), theme.clone());
        let rate_limiter = RateLimiter::in_process(config.rate_limit_max, config.rate_limit_window);
        Self::assemble(config, store, theme, email, rate_limiter)
    }

    fn assemble(
        config: Config,
        store: Arc<dyn DocumentStore>,
        theme: Arc<ThemeEngine>,
        email: EmailService,
        rate_limiter: RateLimiter,
    ) -> Self {
        let tokens = TokenService::new(config.jwt_secret.as_bytes(), config.jwt_expires_in);
        let payments = CheckoutService::from_config(&config).map(Arc::new);
        let images = ImageProcessor::new(config.static_dir.clone());
        Self {
            inner: Arc::new(AppStateInner {
                config: Arc::new(config),
                store,
                tokens,
                theme,
                email: Arc::new(email),
                payments,
                images,
                rate_limiter: Arc::new(rate_limiter),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    pub fn tokens(&self) -> &TokenService {
        &self.inner.tokens
    }

    pub fn theme(&self) -> &Arc<ThemeEngine> {
        &self.inner.theme
    }

    pub fn email(&self) -> &Arc<EmailService> {
        &self.inner.email
    }

    pub fn payments(&self) -> Option<&Arc<CheckoutService>> {
        self.inner.payments.as_ref()
    }

    pub fn images(&self) -> &ImageProcessor {
        &self.inner.images
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.rate_limiter
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.inner.store.backend())
            .field("email", &self.inner.email)
            .field("payments", &self.inner.payments)
            .field("rate_limiter", &self.inner.rate_limiter)
            .finish_non_exhaustive()
    }
}
