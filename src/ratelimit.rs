//! Per-key token bucket rate limiter.
//!
//! Each key (typically an owner id) gets an independent bucket that refills
//! continuously up to its capacity. Acquisition is non-blocking; callers
//! reject the request when no token is available.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    /// A limiter allowing `capacity` requests per key, refilling the full
    /// capacity once per `window`.
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity as f64;
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_per_sec: capacity / window.as_secs_f64().max(f64::EPSILON),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Take one token for `key`. Returns `false` when the bucket is empty.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        self.refill(&mut bucket, now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available for `key`.
    pub fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        match self.buckets.get_mut(key) {
            Some(mut bucket) => {
                self.refill(&mut bucket, now);
                bucket.tokens as u32
            }
            None => self.capacity as u32,
        }
    }
}
