//! Token-bucket admission limiter.
//!
//! Bounds the global rate at which probes start, independently of how many
//! are in flight. Tokens refill continuously at `rate` per second up to a
//! capacity of one second's worth, computed lazily whenever the bucket is
//! touched.

use crate::types::SweepConfig;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Global request-start limiter shared by every admission in a run.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    tick: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket refilling at `rate` tokens per second.
    ///
    /// Capacity is `rate`, but never below one token so that sub-1 rates
    /// can still admit.
    pub fn new(rate: f64, tick: Duration) -> Self {
        let capacity = rate.max(1.0);
        Self {
            rate,
            capacity,
            tick,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &SweepConfig) -> Self {
        Self::new(config.requests_per_second, config.limiter_tick)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Take one token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        while !self.try_acquire() {
            sleep(self.tick).await;
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires.
    ///
    /// Returns `true` if a token was taken.
    pub async fn acquire_until(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if self.try_acquire() {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = sleep(self.tick) => {}
            }
        }
    }

    /// Tokens currently in the bucket, after refill.
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }
}
