//! Token bucket rate limiting keyed by client.
//!
//! Each client key (`user:{id}` or `ip:{addr}`) owns a bucket holding up to
//! `capacity` tokens that refills at `requests_per_minute / 60` tokens per second.
//! Requests to a configured path prefix use that prefix's own limiter.

use crate::config::settings::RateLimitSettings;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A single client's bucket.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes one token if available.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn available(&mut self, now: Instant) -> u32 {
        self.refill(now);
        // Bounded by capacity, which came from a u32
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = self.tokens.floor() as u32;
        whole
    }

    /// Seconds until the next token, rounded up, at least 1.
    pub fn retry_after(&mut self, now: Instant) -> u64 {
        self.refill(now);
        if self.tokens >= 1.0 || self.refill_per_sec <= 0.0 {
            return 1;
        }
        let wait = (1.0 - self.tokens) / self.refill_per_sec;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let secs = wait.ceil() as u64;
        secs.max(1)
    }

    fn is_full(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= self.capacity
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { limit: u32, remaining: u32 },
    Limited { limit: u32, retry_after: u64 },
}

/// Buckets for one limit.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    capacity: u32,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// `burst` defaults to twice the per-minute rate.
    #[must_use]
    pub fn new(requests_per_minute: u32, burst: Option<u32>) -> Self {
        Self {
            requests_per_minute,
            capacity: burst.unwrap_or(requests_per_minute.saturating_mul(2)).max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub async fn check_at(&self, client_key: &str, now: Instant) -> Decision {
        let limit = self.requests_per_minute;
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(client_key.to_string()).or_insert_with(|| {
            TokenBucket::new(self.capacity, f64::from(limit) / 60.0, now)
        });
        if bucket.try_consume(now) {
            Decision::Allowed {
                limit,
                remaining: bucket.available(now),
            }
        } else {
            Decision::Limited {
                limit,
                retry_after: bucket.retry_after(now),
            }
        }
    }

    /// Drops buckets that have refilled completely. Returns how many were removed.
    pub async fn purge_idle_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_full(now));
        before - buckets.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

/// The default limiter plus per-endpoint limiters.
#[derive(Debug)]
pub struct RateLimitRegistry {
    enabled: bool,
    default: RateLimiter,
    endpoints: Vec<(String, RateLimiter)>,
    cleanup_interval: Duration,
}

impl RateLimitRegistry {
    #[must_use]
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        let endpoints = settings
            .endpoints
            .iter()
            .map(|endpoint| {
                (
                    endpoint.path_prefix.clone(),
                    RateLimiter::new(endpoint.requests_per_minute, None),
                )
            })
            .collect::<Vec<_>>();
        info!(
            enabled = settings.enabled,
            requests_per_minute = settings.requests_per_minute,
            endpoints = endpoints.len(),
            "rate limiter initialized"
        );
        Self {
            enabled: settings.enabled,
            default: RateLimiter::new(settings.requests_per_minute, settings.burst),
            endpoints,
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_secs.max(1)),
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// The limiter responsible for `path`.
    #[must_use]
    pub fn limiter_for(&self, path: &str) -> &RateLimiter {
        self.endpoints
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map_or(&self.default, |(_, limiter)| limiter)
    }

    /// Checks one request; always allowed when limiting is disabled.
    pub async fn check(&self, path: &str, client_key: &str) -> Option<Decision> {
        if !self.enabled {
            return None;
        }
        let decision = self.limiter_for(path).check_at(client_key, Instant::now()).await;
        if let Decision::Limited { retry_after, .. } = decision {
            warn!(client_key, path, retry_after, "rate limit exceeded");
        }
        Some(decision)
    }

    pub async fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let mut removed = self.default.purge_idle_at(now).await;
        for (_, limiter) in &self.endpoints {
            removed += limiter.purge_idle_at(now).await;
        }
        if removed > 0 {
            debug!(removed, "idle rate limit buckets purged");
        }
        removed
    }
}

/// Picks the client key: the authenticated user, else the first forwarded
/// address, else the peer address.
#[must_use]
pub fn client_key(user_id: Option<i64>, forwarded_for: Option<&str>, peer: Option<&str>) -> String {
    if let Some(id) = user_id {
        return format!("user:{id}");
    }
    let forwarded = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    format!("ip:{}", forwarded.or(peer).unwrap_or("unknown"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::settings::EndpointLimit;

    #[test]
    fn test_bucket_refills_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2, 1.0, start);
        assert!(bucket.try_consume(start));
        assert!(bucket.try_consume(start));
        assert!(!bucket.try_consume(start));
        assert_eq!(bucket.retry_after(start), 1);

        let later = start + Duration::from_millis(1500);
        assert!(bucket.try_consume(later));
        assert_eq!(bucket.available(later), 0);
        assert!(bucket.available(start + Duration::from_secs(60)) <= 2);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let start = Instant::now();
        // 30 per minute -> one token every 2 seconds
        let mut bucket = TokenBucket::new(1, 0.5, start);
        assert!(bucket.try_consume(start));
        assert_eq!(bucket.retry_after(start + Duration::from_millis(500)), 2);
    }

    #[tokio::test]
    async fn test_limiter_per_client() {
        let limiter = RateLimiter::new(60, Some(3));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(matches!(
                limiter.check_at("ip:1.2.3.4", now).await,
                Decision::Allowed { limit: 60, .. }
            ));
        }
        assert!(matches!(
            limiter.check_at("ip:1.2.3.4", now).await,
            Decision::Limited { retry_after: 1, .. }
        ));
        // Another client is unaffected
        assert!(matches!(
            limiter.check_at("user:7", now).await,
            Decision::Allowed { remaining: 2, .. }
        ));

        assert_eq!(limiter.tracked_clients().await, 2);
        let removed = limiter.purge_idle_at(now + Duration::from_secs(10)).await;
        assert_eq!(removed, 2);
        assert_eq!(limiter.tracked_clients().await, 0);
    }

    #[tokio::test]
    async fn test_registry_routes_sensitive_paths() {
        let settings = RateLimitSettings {
            enabled: true,
            requests_per_minute: 60,
            burst: None,
            endpoints: vec![EndpointLimit {
                path_prefix: "/api/v1/auth/login".to_string(),
                requests_per_minute: 1,
            }],
            cleanup_interval_secs: 300,
        };
        let registry = RateLimitRegistry::from_settings(&settings);
        assert_eq!(registry.limiter_for("/api/v1/auth/login").requests_per_minute(), 1);
        assert_eq!(registry.limiter_for("/api/v1/projects").requests_per_minute(), 60);

        // Burst for a 1/min endpoint is 2
        assert!(matches!(registry.check("/api/v1/auth/login", "ip:a").await, Some(Decision::Allowed { .. })));
        assert!(matches!(registry.check("/api/v1/auth/login", "ip:a").await, Some(Decision::Allowed { .. })));
        assert!(matches!(
            registry.check("/api/v1/auth/login", "ip:a").await,
            Some(Decision::Limited { .. })
        ));

        let disabled = RateLimitRegistry::from_settings(&RateLimitSettings {
            enabled: false,
            ..settings
        });
        assert_eq!(disabled.check("/api/v1/auth/login", "ip:a").await, None);
    }

    #[test]
    fn test_client_key() {
        assert_eq!(client_key(Some(4), Some("9.9.9.9"), None), "user:4");
        assert_eq!(
            client_key(None, Some(" 10.0.0.1 , 172.16.0.1"), Some("127.0.0.1")),
            "ip:10.0.0.1"
        );
        assert_eq!(client_key(None, None, Some("127.0.0.1")), "ip:127.0.0.1");
        assert_eq!(client_key(None, None, None), "ip:unknown");
    }
}
