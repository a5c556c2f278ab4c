//! Rate limiters for requeued items.
//!
//! A rate limiter decides how long a failed item waits before it is eligible
//! again, and remembers how many times each key has failed. Per-item limiters
//! grow the delay with every consecutive failure of the same key; the bucket
//! limiter caps the overall requeue rate regardless of key.

use crate::backoff::FibonacciBackoff;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Backoff policy for failed queue items.
pub trait RateLimiter: Send + Sync {
    /// Records a failure for `key` and returns how long to wait before the
    /// item is retried.
    fn when(&self, key: &str) -> Duration;

    /// Clears the failure history of `key`.
    fn forget(&self, key: &str);

    /// Number of failures recorded for `key` since it was last forgotten.
    fn num_requeues(&self, key: &str) -> u32;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-key failure counters shared by the per-item limiters.
#[derive(Debug, Default)]
struct FailureCounts(Mutex<HashMap<String, u32>>);

impl FailureCounts {
    /// Returns the count before this failure and increments it.
    fn record(&self, key: &str) -> u32 {
        let mut failures = lock(&self.0);
        let count = failures.entry(key.to_string()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    fn forget(&self, key: &str) {
        lock(&self.0).remove(key);
    }

    fn get(&self, key: &str) -> u32 {
        lock(&self.0).get(key).copied().unwrap_or(0)
    }
}

/// Exponential per-item backoff: `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct ItemExponentialRateLimiter {
    base: Duration,
    max: Duration,
    failures: FailureCounts,
}

impl ItemExponentialRateLimiter {
    /// Delay after the first failure when nothing else is configured.
    pub const DEFAULT_BASE: Duration = Duration::from_millis(5);
    /// Cap on the per-item delay when nothing else is configured.
    pub const DEFAULT_MAX: Duration = Duration::from_secs(1000);

    /// Creates a limiter with the given base delay and cap.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: FailureCounts::default(),
        }
    }

    fn delay_for(&self, exponent: u32) -> Duration {
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for ItemExponentialRateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_MAX)
    }
}

impl RateLimiter for ItemExponentialRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let exponent = self.failures.record(key);
        self.delay_for(exponent)
    }

    fn forget(&self, key: &str) {
        self.failures.forget(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.failures.get(key)
    }
}

/// Fibonacci per-item backoff: base, base, 2base, 3base, 5base, ... capped at `max`.
#[derive(Debug)]
pub struct ItemFibonacciRateLimiter {
    backoff: FibonacciBackoff,
    failures: FailureCounts,
}

impl ItemFibonacciRateLimiter {
    /// Creates a limiter with the given base delay and cap.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            backoff: FibonacciBackoff::new(base, max),
            failures: FailureCounts::default(),
        }
    }
}

impl RateLimiter for ItemFibonacciRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let failures = self.failures.record(key);
        self.backoff.delay_for(failures)
    }

    fn forget(&self, key: &str) {
        self.failures.forget(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.failures.get(key)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token bucket shared by all keys.
///
/// Allows `burst` immediate requeues, then one every `1 / qps` seconds. It
/// keeps no per-key history, so `forget` does nothing and `num_requeues` is
/// always zero.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    /// Creates a bucket refilling at `qps` tokens per second, holding at most
    /// `burst` tokens. Starts full.
    ///
    /// Non-positive or non-finite `qps` values are treated as one token per
    /// second and a zero burst as a burst of one.
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let qps = if qps.is_finite() && qps > 0.0 { qps } else { 1.0 };
        let burst = f64::from(burst.max(1));
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _key: &str) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;

        // Reserve a token even if it is not there yet; the wait is the time
        // until the bucket climbs back to zero.
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }

    fn forget(&self, _key: &str) {}

    fn num_requeues(&self, _key: &str) -> u32 {
        0
    }
}

/// Combines several limiters and always waits for the slowest one.
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    /// Creates a limiter from the given members.
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl std::fmt::Debug for MaxOfRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxOfRateLimiter")
            .field("limiters", &self.limiters.len())
            .finish()
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &str) -> Duration {
        // Every member must record the failure, so no short-circuiting here
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .fold(Duration::ZERO, Duration::max)
    }

    fn forget(&self, key: &str) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}
