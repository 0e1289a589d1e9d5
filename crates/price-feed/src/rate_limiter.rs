//! Token bucket rate limiter for upstream providers.
//!
//! Each upstream owns its own limiter instance. Tokens refill in whole
//! cycles: every `refill_every` adds `refill_amount` tokens, capped at
//! `capacity`. A caller that finds the bucket empty sleeps a short slice
//! and tries again; there is no queue, so ordering under contention is
//! first-come-first-tried.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use mktdata_core::RateLimitConfig;

/// Lower bound of the retry sleep slice.
const MIN_RETRY_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
    capacity: u32,
    refill_every: Duration,
    refill_amount: u32,
}

impl TokenBucket {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: config.capacity,
            last_refill: Instant::now(),
            capacity: config.capacity,
            refill_every: config.refill_every(),
            refill_amount: config.refill_amount,
        }
    }

    /// Add whole refill cycles elapsed since the last refill.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let cycles = elapsed.as_millis() / self.refill_every.as_millis().max(1);
        if cycles >= 1 {
            let added = cycles.saturating_mul(self.refill_amount as u128);
            let total = (self.tokens as u128).saturating_add(added);
            self.tokens = total.min(self.capacity as u128) as u32;
            self.last_refill = now;
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// Per-upstream token bucket throttle.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    bucket: Mutex<TokenBucket>,
    retry_slice: Duration,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        let retry_slice = (config.refill_every() / 10).max(MIN_RETRY_SLICE);
        Self {
            name: name.into(),
            bucket: Mutex::new(TokenBucket::new(config)),
            retry_slice,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.bucket.lock().try_acquire(Instant::now())
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            debug!(
                limiter = %self.name,
                "Rate limiter: bucket empty, retrying in {:?}",
                self.retry_slice
            );
            tokio::time::sleep(self.retry_slice).await;
        }
    }

    /// Run `task` once a token is available and return its result.
    /// The task is not invoked before admission.
    pub async fn schedule<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        task().await
    }

    /// Tokens currently available (after applying pending refills).
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }
}
