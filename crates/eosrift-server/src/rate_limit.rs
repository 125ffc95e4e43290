//! Per-token tunnel creation rate limit
//!
//! Token bucket per authtoken: capacity equals the per-minute limit, so
//! the limit doubles as the burst budget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last: Instant,
}

#[derive(Default, Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<i64, Bucket>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one slot if available. Zero `limit_per_minute` or an
    /// unknown token means unlimited.
    pub fn allow(&self, token_id: i64, limit_per_minute: u32) -> bool {
        self.allow_at(token_id, limit_per_minute, Instant::now())
    }

    /// Clock-injected variant for tests.
    pub fn allow_at(&self, token_id: i64, limit_per_minute: u32, now: Instant) -> bool {
        if limit_per_minute == 0 || token_id <= 0 {
            return true;
        }

        let capacity = f64::from(limit_per_minute);
        let refill_per_second = capacity / 60.0;

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(token_id).or_insert(Bucket {
            tokens: capacity,
            last: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = capacity.min(bucket.tokens + elapsed * refill_per_second);
        }
        bucket.last = now;

        if bucket.tokens < 1.0 {
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_burst_up_to_limit_then_refused() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow_at(1, 3, now));
        }
        assert!(!limiter.allow_at(1, 3, now));
    }

    #[test]
    fn test_refills_over_time() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for _ in 0..60 {
            assert!(limiter.allow_at(1, 60, start));
        }
        assert!(!limiter.allow_at(1, 60, start));

        // 60/min refills one token per second.
        assert!(limiter.allow_at(1, 60, start + Duration::from_secs(1)));
        assert!(!limiter.allow_at(1, 60, start + Duration::from_secs(1)));
    }

    #[test]
    fn test_capacity_is_capped() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        assert!(limiter.allow_at(1, 2, start));

        // A long idle period must not bank more than the capacity.
        let later = start + Duration::from_secs(3600);
        assert!(limiter.allow_at(1, 2, later));
        assert!(limiter.allow_at(1, 2, later));
        assert!(!limiter.allow_at(1, 2, later));
    }

    #[test]
    fn test_unlimited_cases() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..100 {
            assert!(limiter.allow_at(1, 0, now));
            assert!(limiter.allow_at(0, 5, now));
        }
    }

    #[test]
    fn test_tokens_are_independent() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        assert!(limiter.allow_at(1, 1, now));
        assert!(!limiter.allow_at(1, 1, now));
        assert!(limiter.allow_at(2, 1, now));
    }
}
