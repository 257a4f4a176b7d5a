//! Fixed-window request throttling.
//!
//! Counters are keyed by `prefix:identifier` so independent call sites never
//! share a budget. A window opens on the first hit and is replaced (not
//! incremented) once its reset time has passed, which lets up to twice the
//! configured rate through across a window boundary.

use crate::error::AppError;
use crate::middleware::client_ip::TrustedProxies;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Script};
use serde::Serialize;
use std::{sync::Arc, time::Duration};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Budget for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub prefix: String,
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(prefix: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            max_requests: max_requests.max(1),
            window,
        }
    }

    /// Key-distribution endpoints.
    pub fn critical() -> Self {
        Self::new("critical", 5, Duration::from_secs(15 * 60))
    }

    /// License verification.
    pub fn high() -> Self {
        Self::new("license", 30, Duration::from_secs(60))
    }

    /// General reads.
    pub fn medium() -> Self {
        Self::new("medium", 100, Duration::from_secs(60))
    }

    /// Authenticated admin actions.
    pub fn low() -> Self {
        Self::new("low", 300, Duration::from_secs(60))
    }

    pub fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.prefix, identifier)
    }

    fn window_duration(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::seconds(60))
    }
}

/// Outcome of a single check. Rejections are values, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitResult {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Backing storage for counters. `hit` must be atomic per key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request against `key`, opening a fresh window if the
    /// current one has elapsed. Returns the entry after the update.
    async fn hit(
        &self,
        key: &str,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitEntry, anyhow::Error>;

    /// Drop entries whose window has elapsed. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error>;
}

/// Single-instance store on a sharded map.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitEntry, anyhow::Error> {
        // The entry guard holds the shard lock for the whole read-increment.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                reset_at: now + window,
            });

        if now >= entry.reset_at {
            *entry = RateLimitEntry {
                count: 1,
                reset_at: now + window,
            };
        } else {
            entry.count = entry.count.saturating_add(1);
        }

        Ok(*entry)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.reset_at <= now)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self
                .entries
                .remove_if(&key, |_, entry| entry.reset_at <= now)
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

const HIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {count, redis.call('PTTL', KEYS[1])}
"#;

/// Shared store for multi-instance deployments. Windows expire through key
/// TTLs, so the sweep is a no-op.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    manager: ConnectionManager,
    script: Arc<Script>,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting rate limiter to Redis");
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        Ok(Self {
            manager,
            script: Arc::new(Script::new(HIT_SCRIPT)),
        })
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitEntry, anyhow::Error> {
        let mut conn = self.manager.clone();
        let (count, ttl_ms): (u32, i64) = self
            .script
            .key(format!("ratelimit:{}", key))
            .arg(window.num_milliseconds())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Rate limit script failed: {}", e))?;

        let ttl = if ttl_ms > 0 {
            chrono::Duration::milliseconds(ttl_ms)
        } else {
            window
        };

        Ok(RateLimitEntry {
            count,
            reset_at: now + ttl,
        })
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, anyhow::Error> {
        Ok(0)
    }
}

/// Fixed-window limiter over an injected store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::new()))
    }

    pub async fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitResult {
        self.check_at(identifier, config, Utc::now()).await
    }

    /// Count a request at `now`. Store failures fail open.
    pub async fn check_at(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> RateLimitResult {
        let key = config.key(identifier);
        match self.store.hit(&key, config.window_duration(), now).await {
            Ok(entry) => RateLimitResult {
                allowed: entry.count <= config.max_requests,
                limit: config.max_requests,
                remaining: config.max_requests.saturating_sub(entry.count),
                reset_at: entry.reset_at,
            },
            Err(e) => {
                tracing::error!(error = %e, key = %key, "Rate limit store unavailable, allowing request");
                RateLimitResult {
                    allowed: true,
                    limit: config.max_requests,
                    remaining: config.max_requests,
                    reset_at: now + config.window_duration(),
                }
            }
        }
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        match self.store.purge_expired(now).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(error = %e, "Rate limit sweep failed");
                0
            }
        }
    }
}

/// Notified whenever the middleware rejects a request.
pub trait RateLimitObserver: Send + Sync {
    fn on_rejected(&self, tier: &str, identifier: &str, endpoint: &str, result: &RateLimitResult);
}

/// State for [`rate_limit_middleware`]: one limiter, one tier.
#[derive(Clone)]
pub struct RateLimitLayer {
    pub limiter: RateLimiter,
    pub config: RateLimitConfig,
    trusted_proxies: TrustedProxies,
    observer: Option<Arc<dyn RateLimitObserver>>,
}

impl RateLimitLayer {
    pub fn new(limiter: RateLimiter, config: RateLimitConfig) -> Self {
        Self {
            limiter,
            config,
            trusted_proxies: TrustedProxies::none(),
            observer: None,
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: TrustedProxies) -> Self {
        self.trusted_proxies = proxies;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RateLimitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Client address for keying: the peer, or its forwarded hop when the
/// peer is a trusted proxy.
pub fn client_identifier(request: &Request, proxies: &TrustedProxies) -> Option<String> {
    proxies
        .resolve_parts(request.headers(), request.extensions())
        .map(|ip| ip.to_string())
}

pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
        HeaderValue::from(result.limit),
    );
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
        HeaderValue::from(result.remaining),
    );
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_RESET_HEADER),
        HeaderValue::from(result.reset_at.timestamp()),
    );
}

pub async fn rate_limit_middleware(
    State(layer): State<RateLimitLayer>,
    request: Request,
    next: Next,
) -> Response {
    let Some(identifier) = client_identifier(&request, &layer.trusted_proxies) else {
        tracing::warn!("Could not determine client address for rate limiting");
        return next.run(request).await;
    };

    let now = Utc::now();
    let result = layer.limiter.check_at(&identifier, &layer.config, now).await;

    if !result.allowed {
        let endpoint = request.uri().path().to_string();
        tracing::warn!(
            identifier = %identifier,
            tier = %layer.config.prefix,
            limit = result.limit,
            endpoint = %endpoint,
            "Rate limit exceeded"
        );
        if let Some(observer) = &layer.observer {
            observer.on_rejected(&layer.config.prefix, &identifier, &endpoint, &result);
        }

        let mut response = AppError::TooManyRequests(
            "Too many requests. Please try again later.".to_string(),
            Some(result.retry_after_secs(now)),
        )
        .into_response();
        apply_rate_limit_headers(response.headers_mut(), &result);
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &result);
    response
}
