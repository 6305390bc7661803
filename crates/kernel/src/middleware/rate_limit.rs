//! Per-client rate limiting for API paths.
//!
//! Fixed-window counters keyed by client address. Redis holds the counters
//! when configured so every instance shares them; otherwise they live in an
//! in-process Moka cache whose entries expire with the window.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use moka::future::Cache;
use redis::Client as RedisClient;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::state::AppState;

/// Upper bound on distinct clients tracked in process.
const LOCAL_MAX_CLIENTS: u64 = 100_000;

enum Counters {
    Redis(RedisClient),
    Local(Cache<String, Arc<AtomicU64>>),
}

/// Fixed-window request counter.
pub struct RateLimiter {
    counters: Counters,
    max: u32,
    window: Duration,
}

impl RateLimiter {
    /// Counters shared through Redis.
    pub fn redis(redis: RedisClient, max: u32, window: Duration) -> Self {
        Self {
            counters: Counters::Redis(redis),
            max,
            window,
        }
    }

    /// Counters kept in this process.
    pub fn in_process(max: u32, window: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(LOCAL_MAX_CLIENTS)
            .time_to_live(window)
            .build();
        Self {
            counters: Counters::Local(cache),
            max,
            window,
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Where counters live, for health output.
    pub fn backend(&self) -> &'static str {
        match self.counters {
            Counters::Redis(_) => "redis",
            Counters::Local(_) => "local",
        }
    }

    /// Count one request.
    ///
    /// Returns the requests left in the window, or the retry-after seconds
    /// once the limit is exceeded.
    pub async fn check(&self, client: &str) -> Result<u64, u64> {
        let key = format!("rate:api:{client}");
        let window_secs = self.window.as_secs();

        let count = match &self.counters {
            Counters::Local(cache) => {
                let counter = cache
                    .get_with(key, async { Arc::new(AtomicU64::new(0)) })
                    .await;
                counter.fetch_add(1, Ordering::SeqCst) + 1
            }
            Counters::Redis(redis) => match increment(redis, &key, window_secs).await {
                Ok(count) => count,
                Err(e) => {
                    // Fail open.
                    warn!(error = %e, "rate limit check failed, allowing request");
                    return Ok(u64::from(self.max));
                }
            },
        };

        let max = u64::from(self.max);
        if count > max {
            debug!(client, count, limit = max, "rate limit exceeded");
            Err(window_secs)
        } else {
            Ok(max - count)
        }
    }
}

/// Atomic INCR + EXPIRE so a crash between the two cannot leave an
/// immortal counter.
async fn increment(
    redis: &RedisClient,
    key: &str,
    ttl_secs: u64,
) -> Result<u64, redis::RedisError> {
    let mut conn = redis.get_multiplexed_async_connection().await?;
    let script = redis::Script::new(
        r"local count = redis.call('INCR', KEYS[1])
          if count == 1 then
            redis.call('EXPIRE', KEYS[1], ARGV[1])
          end
          return count",
    );
    let count: i64 = script
        .key(key)
        .arg(i64::try_from(ttl_secs).unwrap_or(i64::MAX))
        .invoke_async(&mut conn)
        .await?;
    Ok(u64::try_from(count).unwrap_or(0))
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.counters {
            Counters::Redis(_) => "redis",
            Counters::Local(_) => "local",
        };
        f.debug_struct("RateLimiter")
            .field("backend", &backend)
            .field("max", &self.max)
            .field("window", &self.window)
            .finish()
    }
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket.
pub fn get_client_id(addr: Option<SocketAddr>, headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(ip) = value.split(',').next()
        && !ip.trim().is_empty()
    {
        return ip.trim().to_string();
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
    {
        return value.to_string();
    }

    addr.map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware limiting `/api` requests per client.
pub async fn limit_api_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !request.uri().path().starts_with("/api") {
        return next.run(request).await;
    }

    let addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = get_client_id(addr, request.headers());
    let limiter = state.rate_limiter();

    match limiter.check(&client).await {
        Ok(remaining) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.max()));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        Err(retry_after) => AppError::TooManyRequests { retry_after }.into_response(),
    }
}
