//! Configuration from environment variables.

use crate::error::ControllerError;
use reconcile_runtime::{BackoffStrategy, ControllerConfig, RateLimiterConfig};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Namespace watched when `WATCH_NAMESPACE` is unset.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Resource types the controller knows how to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchResource {
    Pods,
    Services,
    Deployments,
}

impl WatchResource {
    /// Kind name used in log lines
    pub fn kind(self) -> &'static str {
        match self {
            WatchResource::Pods => "Pod",
            WatchResource::Services => "Service",
            WatchResource::Deployments => "Deployment",
        }
    }
}

impl fmt::Display for WatchResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchResource::Pods => "pods",
            WatchResource::Services => "services",
            WatchResource::Deployments => "deployments",
        };
        f.write_str(name)
    }
}

impl FromStr for WatchResource {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pods" | "pod" => Ok(WatchResource::Pods),
            "services" | "service" | "svc" => Ok(WatchResource::Services),
            "deployments" | "deployment" | "deploy" => Ok(WatchResource::Deployments),
            other => Err(ControllerError::InvalidConfig(format!(
                "WATCH_RESOURCE must be one of pods, services, deployments (got '{}')",
                other
            ))),
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub namespace: String,
    pub resource: WatchResource,
    pub controller: ControllerConfig,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let namespace = var("WATCH_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let resource = match var("WATCH_RESOURCE") {
            Some(value) => value.parse()?,
            None => WatchResource::Pods,
        };

        let defaults = ControllerConfig::default();
        let mut rate_limiter = RateLimiterConfig::default();
        if let Some(value) = var("BACKOFF_STRATEGY") {
            rate_limiter.strategy = parse_strategy(&value)?;
        }
        if let Some(ms) = parse::<u64>("BACKOFF_BASE_MS", var("BACKOFF_BASE_MS"))? {
            rate_limiter.base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>("BACKOFF_MAX_SECS", var("BACKOFF_MAX_SECS"))? {
            rate_limiter.max_delay = Duration::from_secs(secs);
        }
        if let Some(qps) = parse::<f64>("OVERALL_QPS", var("OVERALL_QPS"))? {
            rate_limiter.overall_qps = Some(qps);
        }
        if let Some(burst) = parse::<u32>("OVERALL_BURST", var("OVERALL_BURST"))? {
            rate_limiter.overall_burst = burst;
        }

        let sync_timeout = match parse::<u64>("SYNC_TIMEOUT_SECS", var("SYNC_TIMEOUT_SECS"))? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.sync_timeout,
        };

        let controller = ControllerConfig::default()
            .with_name(format!("{}-informer", resource))
            .with_workers(parse("WORKER_COUNT", var("WORKER_COUNT"))?.unwrap_or(defaults.workers))
            .with_max_retries(parse("MAX_RETRIES", var("MAX_RETRIES"))?.unwrap_or(defaults.max_retries))
            .with_sync_timeout(sync_timeout)
            .with_rate_limiter(rate_limiter);
        if let Err(reconcile_runtime::ControllerError::InvalidConfig(reason)) = controller.validate() {
            return Err(ControllerError::InvalidConfig(reason));
        }

        Ok(Self {
            namespace,
            resource,
            controller,
        })
    }

    /// Logs the effective configuration.
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Namespace: {}", self.namespace);
        info!("  Resource: {}", self.resource);
        info!("  Workers: {}", self.controller.workers);
        info!("  Max retries: {}", self.controller.max_retries);
        match self.controller.sync_timeout {
            Some(limit) => info!("  Sync timeout: {:?}", limit),
            None => info!("  Sync timeout: none"),
        }
        let limiter = &self.controller.rate_limiter;
        info!(
            "  Backoff: {:?} from {:?} up to {:?}",
            limiter.strategy, limiter.base_delay, limiter.max_delay
        );
        if let Some(qps) = limiter.overall_qps {
            info!("  Overall rate: {} qps, burst {}", qps, limiter.overall_burst);
        }
    }
}

fn parse_strategy(value: &str) -> Result<BackoffStrategy, ControllerError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "exponential" => Ok(BackoffStrategy::Exponential),
        "fibonacci" => Ok(BackoffStrategy::Fibonacci),
        other => Err(ControllerError::InvalidConfig(format!(
            "BACKOFF_STRATEGY must be exponential or fibonacci (got '{}')",
            other
        ))),
    }
}

fn parse<T>(name: &str, value: Option<String>) -> Result<Option<T>, ControllerError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                ControllerError::InvalidConfig(format!("{} has invalid value '{}': {}", name, raw, e))
            })
        })
        .transpose()
}
