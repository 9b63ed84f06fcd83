//! Per-platform token-bucket admission control
//!
//! Buckets refill lazily from elapsed wall-clock time; there is no
//! background timer. `try_acquire` never blocks: a caller that is refused a
//! token re-queues its subtask instead of waiting, keeping workers free for
//! other platforms.

use crate::config::RateLimitConfig;
use crate::model::Platform;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn drain(&mut self, now: Instant) {
        self.refill(now);
        self.tokens = 0.0;
    }
}

/// Process-wide token buckets keyed by platform
pub struct RateLimiter {
    buckets: Mutex<HashMap<Platform, Bucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Takes one token for the platform if available; never blocks
    pub fn try_acquire(&self, platform: Platform) -> bool {
        self.try_acquire_at(platform, Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, platform: Platform, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        self.bucket_mut(&mut buckets, platform, now).try_take(now)
    }

    /// Empties the platform's bucket, independent of the refill schedule
    ///
    /// Applied when the platform itself signals throttling (HTTP 429), so
    /// the whole process backs off rather than just the offending subtask.
    pub fn penalize(&self, platform: Platform) {
        self.penalize_at(platform, Instant::now());
    }

    pub(crate) fn penalize_at(&self, platform: Platform, now: Instant) {
        let mut buckets = self.buckets.lock().unwrap();
        self.bucket_mut(&mut buckets, platform, now).drain(now);
        tracing::debug!("Rate-limit bucket drained for platform {}", platform);
    }

    fn bucket_mut<'a>(
        &self,
        buckets: &'a mut HashMap<Platform, Bucket>,
        platform: Platform,
        now: Instant,
    ) -> &'a mut Bucket {
        buckets.entry(platform).or_insert_with(|| {
            let (capacity, refill) = self.params_for(platform);
            Bucket::new(capacity, refill, now)
        })
    }

    fn params_for(&self, platform: Platform) -> (f64, f64) {
        self.config
            .overrides
            .iter()
            .find(|o| o.platform == platform)
            .map(|o| (o.capacity, o.refill_per_sec))
            .unwrap_or((self.config.capacity, self.config.refill_per_sec))
    }
}
