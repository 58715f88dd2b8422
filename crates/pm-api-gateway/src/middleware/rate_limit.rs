//! Per-key token bucket rate limiting.
//!
//! One [`RateLimiter`] per route. Buckets are created lazily at full
//! capacity and refilled from the injected [`Clock`] on every check. The
//! refill-then-decrement runs under the bucket's map entry lock, so two
//! requests for the same key never consume the same token while distinct
//! keys proceed in parallel.
//!
//! The store is bounded: idle buckets are swept by [`cleanup_task`], and a
//! full store evicts idle buckets (then the least recently seen one) before
//! admitting a new key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::config::{BucketStoreConfig, RateLimitConfig};
use crate::domain::RateLimitKey;
use crate::ports::Clock;

/// Token bucket state for one key
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    /// Last time the key was checked (for eviction)
    last_seen: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Tokens available at `now`, without mutating the bucket.
    fn available(&self, now: Instant, capacity: f64, refill_per_second: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * refill_per_second).min(capacity)
    }

    fn refill(&mut self, now: Instant, capacity: f64, refill_per_second: f64) {
        // Never move last_refill backwards
        if now > self.last_refill {
            self.tokens = self.available(now, capacity, refill_per_second);
            self.last_refill = now;
        }
    }

    /// Refill, then take one token. `Err` carries the wait until one is available.
    fn try_consume(
        &mut self,
        now: Instant,
        capacity: f64,
        refill_per_second: f64,
    ) -> Result<f64, Duration> {
        self.last_seen = now;
        self.refill(now, capacity, refill_per_second);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(self.tokens)
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::try_from_secs_f64(deficit / refill_per_second).unwrap_or(Duration::MAX))
        }
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole tokens left after this check
    pub remaining: u32,
    /// Wait before a token is available (zero when allowed)
    pub retry_after: Duration,
}

/// Token bucket rate limiter for one route
pub struct RateLimiter {
    route: Arc<str>,
    config: RateLimitConfig,
    max_keys: usize,
    idle_ttl: Duration,
    clock: Arc<dyn Clock>,
    buckets: DashMap<RateLimitKey, TokenBucket>,
    /// Serialises creation of new buckets so `max_keys` holds
    insert_lock: Mutex<()>,
}

impl RateLimiter {
    pub fn new(
        route: impl Into<Arc<str>>,
        config: RateLimitConfig,
        store: &BucketStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            route: route.into(),
            config,
            max_keys: store.max_keys.max(1),
            idle_ttl: store.idle_ttl,
            clock,
            buckets: DashMap::new(),
            insert_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one request for `key`.
    pub fn check(&self, key: &RateLimitKey) -> RateLimitDecision {
        if !self.config.enabled {
            return RateLimitDecision {
                allowed: true,
                remaining: self.config.capacity,
                retry_after: Duration::ZERO,
            };
        }

        let capacity = f64::from(self.config.capacity);
        let rate = self.config.refill_per_second;

        let result = match self.buckets.get_mut(key) {
            Some(mut bucket) => bucket.try_consume(self.clock.now(), capacity, rate),
            None => {
                let _guard = self.insert_lock.lock();
                if !self.buckets.contains_key(key) && self.buckets.len() >= self.max_keys {
                    self.make_room();
                }
                let mut bucket = self.buckets.entry(key.clone()).or_insert_with(|| {
                    debug!(route = %self.route, key = %key, "Creating new rate limit bucket");
                    TokenBucket::full(capacity, self.clock.now())
                });
                bucket.try_consume(self.clock.now(), capacity, rate)
            }
        };

        match result {
            Ok(remaining) => RateLimitDecision {
                allowed: true,
                remaining: remaining.floor() as u32,
                retry_after: Duration::ZERO,
            },
            Err(retry_after) => RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            },
        }
    }

    /// Boolean form of [`check`](Self::check).
    pub fn allow(&self, key: &RateLimitKey) -> bool {
        self.check(key).allowed
    }

    /// Tokens `key` would have right now, `None` if the key has no bucket.
    pub fn available(&self, key: &RateLimitKey) -> Option<f64> {
        let now = self.clock.now();
        self.buckets.get(key).map(|bucket| {
            bucket.available(now, f64::from(self.config.capacity), self.config.refill_per_second)
        })
    }

    /// Remove buckets unseen for at least `idle_ttl`. Returns how many were removed.
    pub fn cleanup(&self, idle_ttl: Duration) -> usize {
        let now = self.clock.now();
        let before = self.buckets.len();
        self.buckets.retain(|key, bucket| {
            let idle = now.saturating_duration_since(bucket.last_seen);
            if idle >= idle_ttl {
                debug!(
                    route = %self.route,
                    key = %key,
                    idle_secs = idle.as_secs(),
                    "Removing stale rate limit bucket"
                );
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Number of tracked keys
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Called with `insert_lock` held and no bucket guard alive.
    fn make_room(&self) {
        if self.cleanup(self.idle_ttl) > 0 {
            return;
        }

        let oldest = self
            .buckets
            .iter()
            .min_by_key(|entry| entry.value().last_seen)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            warn!(
                route = %self.route,
                key = %key,
                max_keys = self.max_keys,
                "Rate limit store full, evicting least recently seen bucket"
            );
            self.buckets.remove(&key);
        }
    }
}

/// Background task to clean up stale rate limit buckets
pub async fn cleanup_task(limiters: Vec<Arc<RateLimiter>>, interval: Duration, idle_ttl: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        for limiter in &limiters {
            let removed = limiter.cleanup(idle_ttl);
            if removed > 0 {
                debug!(route = %limiter.route, removed, "Rate limit cleanup pass");
            }
        }
    }
}
