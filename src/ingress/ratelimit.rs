//! Per-key token-bucket rate limiting for webhook endpoints.
//!
//! Keys are `endpoint:<last path segment>` for paths with at least two
//! segments, else the client IP. Buckets live in a concurrent table; a
//! sweeper task evicts buckets idle past the TTL so abandoned keys do not
//! accumulate. `stop()` releases the sweeper.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::defaults;

/// Which key dimension limited a request (label on the scope metric).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    Endpoint,
    Ip,
}

impl RateScope {
    pub fn as_str(self) -> &'static str {
        match self {
            RateScope::Endpoint => "endpoint",
            RateScope::Ip => "ip",
        }
    }
}

/// Derive the bucket key for a request path and client IP.
pub fn rate_limit_key(path: &str, client_ip: IpAddr) -> (String, RateScope) {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() >= 2 {
        (
            format!("endpoint:{}", segments[segments.len() - 1]),
            RateScope::Endpoint,
        )
    } else {
        (client_ip.to_string(), RateScope::Ip)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

/// Limiter configuration derived from `WEBHOOK_RATE_LIMIT` and defaults.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity: tokens per refill interval.
    pub max_tokens: u64,
    pub refill_interval: Duration,
    /// Idle bucket eviction horizon.
    pub bucket_ttl: Duration,
}

impl RateLimiterConfig {
    pub fn from_env() -> Self {
        let max_tokens = std::env::var("WEBHOOK_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults::RATE_LIMIT_TOKENS);
        Self {
            max_tokens,
            refill_interval: Duration::from_secs(defaults::RATE_LIMIT_REFILL_SECS),
            bucket_ttl: Duration::from_secs(defaults::RATE_LIMIT_BUCKET_TTL_SECS),
        }
    }

    /// Refill rate as an integer >= 1 tokens/second.
    fn tokens_per_second(&self) -> u64 {
        (self.max_tokens / self.refill_interval.as_secs().max(1)).max(1)
    }
}

/// Concurrent per-key token buckets.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<String, Bucket>,
    sweeper_cancel: CancellationToken,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            sweeper_cancel: CancellationToken::new(),
        }
    }

    /// Try to take one token for `key`. Returns false when the bucket is dry.
    pub fn check(&self, key: &str) -> bool {
        let rate = self.config.tokens_per_second() as f64;
        let capacity = self.config.max_tokens as f64;
        let now = Instant::now();

        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: now,
            last_used: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_refill = now;
        bucket.last_used = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Spawn the hourly idle-bucket sweeper. Call once after construction.
    pub fn start_sweeper(self: &Arc<Self>) {
        let limiter = self.clone();
        let cancel = self.sweeper_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Rate limiter sweeper stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                limiter.sweep();
            }
        });
        info!(
            max_tokens = self.config.max_tokens,
            refill_secs = self.config.refill_interval.as_secs(),
            "Rate limiter sweeper started"
        );
    }

    /// Evict buckets idle longer than the TTL.
    pub fn sweep(&self) {
        let ttl = self.config.bucket_ttl;
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_used) < ttl);
        let evicted = before - self.buckets.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.buckets.len(), "Swept idle rate-limit buckets");
        }
    }

    /// Release the sweeper task.
    pub fn stop(&self) {
        self.sweeper_cancel.cancel();
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.sweeper_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_tokens: u64, refill_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            max_tokens,
            refill_interval: Duration::from_secs(refill_secs),
            bucket_ttl: Duration::from_secs(3600),
        })
    }

    #[test]
    fn key_uses_last_segment_for_deep_paths() {
        let ip = "10.0.0.1".parse().unwrap();
        let (key, scope) = rate_limit_key("/falco/webhook", ip);
        assert_eq!(key, "endpoint:webhook");
        assert_eq!(scope, RateScope::Endpoint);

        let (key, scope) = rate_limit_key("/x/ep", ip);
        assert_eq!(key, "endpoint:ep");
        assert_eq!(scope, RateScope::Endpoint);
    }

    #[test]
    fn key_falls_back_to_ip_for_shallow_paths() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let (key, scope) = rate_limit_key("/ingest", ip);
        assert_eq!(key, "10.0.0.1");
        assert_eq!(scope, RateScope::Ip);
    }

    #[test]
    fn burst_is_bounded_by_capacity() {
        let limiter = limiter(60, 60);
        let mut allowed = 0;
        for _ in 0..100 {
            if limiter.check("endpoint:ep") {
                allowed += 1;
            }
        }
        // Whole burst happens inside one second: capacity plus at most the
        // one token the refill can add in that time.
        assert!(allowed >= 60 && allowed <= 61, "allowed = {}", allowed);
    }

    #[test]
    fn distinct_keys_have_distinct_buckets() {
        let limiter = limiter(2, 60);
        assert!(limiter.check("endpoint:a"));
        assert!(limiter.check("endpoint:a"));
        assert!(!limiter.check("endpoint:a"));
        // A different key is untouched.
        assert!(limiter.check("endpoint:b"));
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn refill_restores_tokens() {
        // 120 tokens / 60s -> 2 tokens/sec.
        let limiter = limiter(120, 60);
        for _ in 0..120 {
            assert!(limiter.check("k"));
        }
        assert!(!limiter.check("k"));
        std::thread::sleep(Duration::from_millis(600));
        // ~1.2 tokens refilled.
        assert!(limiter.check("k"));
    }

    #[test]
    fn rate_is_at_least_one_token_per_second() {
        // 1 token per hour would starve; the floor is 1/sec.
        let config = RateLimiterConfig {
            max_tokens: 1,
            refill_interval: Duration::from_secs(3600),
            bucket_ttl: Duration::from_secs(3600),
        };
        assert_eq!(config.tokens_per_second(), 1);
    }

    #[test]
    fn sweep_evicts_idle_buckets() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_tokens: 10,
            refill_interval: Duration::from_secs(60),
            bucket_ttl: Duration::from_millis(10),
        });
        limiter.check("k1");
        limiter.check("k2");
        std::thread::sleep(Duration::from_millis(30));
        limiter.check("k3");
        limiter.sweep();
        assert_eq!(limiter.bucket_count(), 1);
    }
}
