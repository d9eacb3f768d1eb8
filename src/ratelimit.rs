//! Rate limiting backed by governor
//!
//! Uses the governor crate's keyed GCRA limiters. Handlers depend on the
//! [`RateLimiter`] trait only, so the in-memory implementation here can be
//! swapped for a shared-store one without touching any handler. Each
//! endpoint applies two independent checks per request: one keyed by client
//! IP and one keyed by user id.

use async_trait::async_trait;
use governor::{
    Quota,
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::config::get_env_with_prefix;
use crate::error::{AppError, Result};

/// Shrink the keyed state stores every N checks to prevent unbounded memory
/// growth from many distinct keys.
const SHRINK_INTERVAL: u64 = 1000;

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum number of requests allowed per window, per key
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Time window in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Trust X-Forwarded-For / X-Real-IP for client IP detection.
    ///
    /// SECURITY: only enable behind a reverse proxy that overwrites these
    /// headers; otherwise clients can spoof their IP and bypass per-IP
    /// limiting. Default: `false`.
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            trust_proxy: false,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(enabled) = get_env_with_prefix("RATE_LIMIT_ENABLED") {
            config.enabled = enabled.parse().unwrap_or(true);
        }
        if let Some(max_requests) = get_env_with_prefix("RATE_LIMIT_MAX_REQUESTS") {
            if let Ok(val) = max_requests.parse() {
                config.max_requests = val;
            }
        }
        if let Some(window) = get_env_with_prefix("RATE_LIMIT_WINDOW_SECONDS") {
            if let Ok(val) = window.parse() {
                config.window_seconds = val;
            }
        }
        if let Some(trust_proxy) = get_env_with_prefix("RATE_LIMIT_TRUST_PROXY") {
            config.trust_proxy = trust_proxy.parse().unwrap_or(false);
        }

        config
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_requests() -> u32 {
    30
}

fn default_window_seconds() -> u64 {
    60
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Seconds until the next request would be admitted; 0 when allowed.
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    pub fn deny(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs,
        }
    }
}

/// Rate limiting as an injected capability.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check whether one more request under `key` fits within `limit`
    /// requests per window.
    async fn check(&self, limit: u32, key: &str) -> Result<RateLimitDecision>;
}

#[async_trait]
impl<T: RateLimiter + ?Sized> RateLimiter for Arc<T> {
    async fn check(&self, limit: u32, key: &str) -> Result<RateLimitDecision> {
        (**self).check(limit, key).await
    }
}

type KeyedLimiter =
    governor::RateLimiter<String, DashMapStateStore<String>, DefaultClock, NoOpMiddleware>;

/// In-memory keyed limiter using governor's GCRA algorithm.
///
/// One keyed limiter is kept per distinct `limit` value so callers can ask
/// for different budgets against the same instance. Keyed state stores are
/// periodically shrunk to drop stale entries.
pub struct GovernorRateLimiter {
    window: Duration,
    limiters: RwLock<HashMap<u32, Arc<KeyedLimiter>>>,
    check_count: AtomicU64,
}

impl GovernorRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_seconds.max(1)),
            limiters: RwLock::new(HashMap::new()),
            check_count: AtomicU64::new(0),
        }
    }

    fn limiter_for(&self, limit: u32) -> Result<Arc<KeyedLimiter>> {
        let burst = NonZeroU32::new(limit.max(1)).ok_or_else(|| {
            AppError::internal("rate limit burst must be positive")
        })?;

        {
            let limiters = self
                .limiters
                .read()
                .map_err(|_| AppError::internal("rate limiter lock poisoned"))?;
            if let Some(limiter) = limiters.get(&limit) {
                return Ok(limiter.clone());
            }
        }

        // Replenish one cell per window/limit so the budget averages out to
        // `limit` per window, with the full budget available as burst.
        let period = self
            .window
            .checked_div(limit.max(1))
            .filter(|p| !p.is_zero())
            .unwrap_or(self.window);
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_minute(burst))
            .allow_burst(burst);
        let limiter = Arc::new(governor::RateLimiter::keyed(quota));

        let mut limiters = self
            .limiters
            .write()
            .map_err(|_| AppError::internal("rate limiter lock poisoned"))?;
        Ok(limiters.entry(limit).or_insert(limiter).clone())
    }
}

#[async_trait]
impl RateLimiter for GovernorRateLimiter {
    async fn check(&self, limit: u32, key: &str) -> Result<RateLimitDecision> {
        let limiter = self.limiter_for(limit)?;

        let count = self.check_count.fetch_add(1, Ordering::Relaxed);
        if count % SHRINK_INTERVAL == 0 && count > 0 {
            limiter.retain_recent();
        }

        match limiter.check_key(&key.to_string()) {
            Ok(_) => Ok(RateLimitDecision::allow()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Ok(RateLimitDecision::deny(wait.as_secs().max(1)))
            }
        }
    }
}

/// Determine the client IP for rate limit keying.
///
/// SECURITY: proxy headers are only consulted when `trust_proxy` is set;
/// otherwise only the direct connection address is used, which prevents
/// spoofing via X-Forwarded-For.
pub fn client_ip(
    headers: &axum::http::HeaderMap,
    peer: Option<std::net::IpAddr>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        // X-Forwarded-For may contain "client, proxy1, proxy2"; the leftmost
        // entry is the original client when the proxy is trusted to set it.
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .filter(|s| !s.is_empty())
        {
            return forwarded;
        }
        if let Some(real_ip) = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            return real_ip;
        }
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn limiter(max_requests: u32) -> GovernorRateLimiter {
        GovernorRateLimiter::new(&RateLimitConfig {
            enabled: true,
            max_requests,
            window_seconds: 60,
            trust_proxy: false,
        })
    }

    #[tokio::test]
    async fn allows_requests_under_limit() {
        let limiter = limiter(5);
        for i in 0..5 {
            let decision = limiter.check(5, "ip:192.168.1.1").await.expect("check");
            assert!(decision.allowed, "request {} should be allowed", i + 1);
        }
    }

    #[tokio::test]
    async fn denies_request_over_limit() {
        let limiter = limiter(5);
        for _ in 0..5 {
            limiter.check(5, "ip:192.168.1.1").await.expect("check");
        }
        let decision = limiter.check(5, "ip:192.168.1.1").await.expect("check");
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs >= 1);
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let limiter = limiter(3);
        for _ in 0..3 {
            limiter.check(3, "ip:10.0.0.1").await.expect("check");
        }
        assert!(!limiter.check(3, "ip:10.0.0.1").await.expect("check").allowed);
        // A different key still has its full budget
        assert!(limiter.check(3, "ip:10.0.0.2").await.expect("check").allowed);
        // As does the same identifier under a different namespace
        assert!(limiter.check(3, "user:10.0.0.1").await.expect("check").allowed);
    }

    #[tokio::test]
    async fn distinct_limits_are_tracked_separately() {
        let limiter = limiter(2);
        for _ in 0..2 {
            limiter.check(2, "ip:10.0.0.9").await.expect("check");
        }
        assert!(!limiter.check(2, "ip:10.0.0.9").await.expect("check").allowed);
        // A larger budget for the same key uses its own limiter
        assert!(limiter.check(10, "ip:10.0.0.9").await.expect("check").allowed);
    }

    #[test]
    fn ignores_proxy_headers_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4".parse().expect("header"));
        let peer = Some("9.9.9.9".parse().expect("ip"));
        assert_eq!(client_ip(&headers, peer, false), "9.9.9.9");
    }

    #[test]
    fn trusts_leftmost_forwarded_ip_when_enabled() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "1.2.3.4, 5.6.7.8".parse().expect("header"),
        );
        let peer = Some("9.9.9.9".parse().expect("ip"));
        assert_eq!(client_ip(&headers, peer, true), "1.2.3.4");
    }

    #[test]
    fn falls_back_to_unknown_without_peer() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, None, false), "unknown");
    }
}
