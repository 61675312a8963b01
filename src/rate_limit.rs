//! Per-token and per-IP call ceilings for the gateway.
//!
//! Each counter lives in a moka cache with a TTL equal to the window, so a
//! bucket starts at its first increment and disappears when the window
//! ends. Admission is a compare-and-swap on the counter.

use axum::http::HeaderMap;
use moka::sync::Cache;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use brandkb_core::error::{KbError, KbResult};

use crate::config::GatewayConfig;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window: Duration,
    pub enabled: bool,
    /// Upper bound on tracked counters.
    pub max_clients: u64,
}

impl RateLimitConfig {
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            max_requests: config.rate_limit_per_hour,
            window: Duration::from_secs(3600),
            enabled: config.rate_limit_enabled,
            max_clients: 100_000,
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    counters: Cache<String, Arc<AtomicU64>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let counters = Cache::builder()
            .max_capacity(config.max_clients)
            .time_to_live(config.window)
            .build();
        Self { config, counters }
    }

    fn counter(&self, key: String) -> Arc<AtomicU64> {
        self.counters
            .get_with(key, || Arc::new(AtomicU64::new(0)))
    }

    /// Increment `counter` unless it already reached the ceiling.
    fn try_increment(&self, counter: &AtomicU64) -> bool {
        let limit = self.config.max_requests;
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Admit one call for `token_id` from `client_ip`, or fail with
    /// [`KbError::RateLimited`]. Both counters advance or neither does.
    pub fn check(&self, token_id: i64, client_ip: &str) -> KbResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let by_token = self.counter(format!("token:{}", token_id));
        if !self.try_increment(&by_token) {
            tracing::warn!(token_id, "token rate limit exceeded");
            return Err(KbError::RateLimited);
        }

        let by_ip = self.counter(format!("ip:{}", client_ip));
        if !self.try_increment(&by_ip) {
            by_token.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(token_id, client_ip, "ip rate limit exceeded");
            return Err(KbError::RateLimited);
        }

        Ok(())
    }

    /// Calls counted in the current window for `token_id`.
    pub fn token_usage(&self, token_id: i64) -> u64 {
        self.counters
            .get(&format!("token:{}", token_id))
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn ip_usage(&self, client_ip: &str) -> u64 {
        self.counters
            .get(&format!("ip:{}", client_ip))
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }

    remote
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn limiter(max: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests: max,
            window: Duration::from_secs(3600),
            enabled: true,
            max_clients: 1000,
        })
    }

    #[test]
    fn test_ceiling_per_token() {
        let rl = limiter(3);
        for _ in 0..3 {
            rl.check(1, "10.0.0.1").unwrap();
        }
        assert!(matches!(rl.check(1, "10.0.0.1"), Err(KbError::RateLimited)));
        assert_eq!(rl.token_usage(1), 3);
        // Another token from another address is unaffected.
        rl.check(2, "10.0.0.2").unwrap();
    }

    #[test]
    fn test_ip_rejection_rolls_back_token_counter() {
        let rl = limiter(2);
        rl.check(1, "10.0.0.9").unwrap();
        rl.check(2, "10.0.0.9").unwrap();

        // IP is saturated; token 3 must not be charged for the rejected call.
        assert!(rl.check(3, "10.0.0.9").is_err());
        assert_eq!(rl.token_usage(3), 0);
        assert_eq!(rl.ip_usage("10.0.0.9"), 2);
    }

    #[test]
    fn test_disabled_admits_everything() {
        let rl = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(3600),
            enabled: false,
            max_clients: 10,
        });
        for _ in 0..5 {
            rl.check(1, "x").unwrap();
        }
        assert_eq!(rl.token_usage(1), 0);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_ceiling() {
        let rl = Arc::new(limiter(50));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| rl.check(7, &format!("10.0.1.{}", i)).is_ok())
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(rl.token_usage(7), 50);
    }

    #[test]
    fn test_client_ip_precedence() {
        let remote: SocketAddr = "192.0.2.7:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(remote)), "192.0.2.7");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers, Some(remote)), "198.51.100.4");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(remote)), "203.0.113.1");
    }
}
