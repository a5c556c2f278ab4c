//! Controller configuration.

use crate::error::ControllerError;
use std::time::Duration;
use workqueue::{
    BucketRateLimiter, ItemExponentialRateLimiter, ItemFibonacciRateLimiter, MaxOfRateLimiter,
    RateLimiter,
};

/// How the per-key delay grows with consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// base, 2base, 4base, ...
    #[default]
    Exponential,
    /// base, base, 2base, 3base, 5base, ...
    Fibonacci,
}

/// Backoff applied to failed items.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Growth of the per-key delay
    pub strategy: BackoffStrategy,
    /// Delay after the first failure of a key
    pub base_delay: Duration,
    /// Cap on the per-key delay
    pub max_delay: Duration,
    /// Optional overall requeue rate across all keys
    pub overall_qps: Option<f64>,
    /// Burst size for the overall rate, ignored without `overall_qps`
    pub overall_burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            base_delay: ItemExponentialRateLimiter::DEFAULT_BASE,
            max_delay: ItemExponentialRateLimiter::DEFAULT_MAX,
            overall_qps: None,
            overall_burst: 100,
        }
    }
}

impl RateLimiterConfig {
    /// Builds the rate limiter described by this configuration.
    ///
    /// Per-key backoff, combined with a shared token bucket when an overall
    /// rate is set.
    #[must_use]
    pub fn build(&self) -> Box<dyn RateLimiter> {
        let per_item: Box<dyn RateLimiter> = match self.strategy {
            BackoffStrategy::Exponential => {
                Box::new(ItemExponentialRateLimiter::new(self.base_delay, self.max_delay))
            }
            BackoffStrategy::Fibonacci => {
                Box::new(ItemFibonacciRateLimiter::new(self.base_delay, self.max_delay))
            }
        };
        match self.overall_qps {
            Some(qps) => Box::new(MaxOfRateLimiter::new(vec![
                per_item,
                Box::new(BucketRateLimiter::new(qps, self.overall_burst)),
            ])),
            None => per_item,
        }
    }
}

/// Configuration for a [`crate::Controller`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Name used in logs
    pub name: String,
    /// Number of concurrent workers
    pub workers: usize,
    /// Consecutive failures tolerated for a key before it is dropped
    pub max_retries: u32,
    /// How long to wait for the initial sync; `None` waits forever
    pub sync_timeout: Option<Duration>,
    /// Backoff for failed items
    pub rate_limiter: RateLimiterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "controller".to_string(),
            workers: 1,
            max_retries: 5,
            sync_timeout: Some(Duration::from_secs(30)),
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Sets the name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the number of workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the retry ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial sync timeout.
    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Sets the backoff configuration.
    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Checks the configuration for values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ControllerError::InvalidConfig(
                "max retries must be at least 1".to_string(),
            ));
        }
        if self.rate_limiter.base_delay.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "backoff base delay must be greater than zero".to_string(),
            ));
        }
        if self.rate_limiter.base_delay > self.rate_limiter.max_delay {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff base delay {:?} exceeds max delay {:?}",
                self.rate_limiter.base_delay, self.rate_limiter.max_delay
            )));
        }
        if let Some(qps) = self.rate_limiter.overall_qps {
            if !qps.is_finite() || qps <= 0.0 {
                return Err(ControllerError::InvalidConfig(format!(
                    "overall qps must be positive, got {}",
                    qps
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ControllerConfig::default().with_workers(0);
        assert!(matches!(config.validate(), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let config = ControllerConfig::default().with_max_retries(0);
        assert!(matches!(config.validate(), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let config = ControllerConfig::default().with_rate_limiter(RateLimiterConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_base_delay_rejected() {
        let config = ControllerConfig::default().with_rate_limiter(RateLimiterConfig {
            base_delay: Duration::ZERO,
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_qps_rejected() {
        let config = ControllerConfig::default().with_rate_limiter(RateLimiterConfig {
            overall_qps: Some(0.0),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_build_tracks_requeues() {
        let limiter = RateLimiterConfig {
            overall_qps: Some(10.0),
            ..Default::default()
        }
        .build();

        assert_eq!(limiter.when("ns/foo"), Duration::from_millis(5));
        assert_eq!(limiter.when("ns/foo"), Duration::from_millis(10));
        assert_eq!(limiter.num_requeues("ns/foo"), 2);
    }

    #[test]
    fn test_build_fibonacci_strategy() {
        let limiter = RateLimiterConfig {
            strategy: BackoffStrategy::Fibonacci,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(45),
            ..Default::default()
        }
        .build();

        let delays: Vec<Duration> = (0..6).map(|_| limiter.when("ns/foo")).collect();
        assert_eq!(
            delays,
            [10, 10, 20, 30, 45, 45].map(Duration::from_millis).to_vec()
        );
        limiter.forget("ns/foo");
        assert_eq!(limiter.num_requeues("ns/foo"), 0);
    }
}
