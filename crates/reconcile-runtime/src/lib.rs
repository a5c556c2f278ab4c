//! Reconcile Runtime
//!
//! Runs a watch-queue-reconcile controller:
//!
//! 1. An [`informer::Informer`] mirrors the event source into a
//!    [`informer::Store`] and enqueues an encoded work item per change
//! 2. The controller waits for the initial sync before starting workers
//! 3. A pool of workers drains the [`workqueue::RateLimitingQueue`], looks the
//!    key up in the store and calls the [`Reconcile`] handler
//! 4. Failures are retried with backoff up to a ceiling, then reported to a
//!    [`FatalSink`] and dropped
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use informer::kube_source::watch_stream;
//! use k8s_openapi::api::core::v1::Pod;
//! use kube::{Api, Client};
//! use reconcile_runtime::{Controller, ControllerConfig, Reconcile};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use workqueue::{ActionTag, ResourceKey};
//!
//! struct PrintPods;
//!
//! #[async_trait]
//! impl Reconcile<Pod> for PrintPods {
//!     type Error = std::convert::Infallible;
//!
//!     async fn reconcile(
//!         &self,
//!         action: ActionTag,
//!         key: &ResourceKey,
//!         pod: Option<Arc<Pod>>,
//!     ) -> Result<(), Self::Error> {
//!         println!("{} {} (exists: {})", action, key, pod.is_some());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::try_default().await?;
//! let pods: Api<Pod> = Api::namespaced(client, "default");
//!
//! let controller = Controller::new(ControllerConfig::default(), PrintPods)?;
//! let shutdown = CancellationToken::new();
//! controller
//!     .run(watch_stream(pods, Default::default()), shutdown)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod fatal;
pub mod reconciler;
mod worker;

#[cfg(test)]
mod test_utils;

pub use config::{BackoffStrategy, ControllerConfig, RateLimiterConfig};
pub use controller::{Controller, LifecycleState};
pub use error::ControllerError;
pub use fatal::{FatalEvent, FatalSink, TracingFatalSink};
pub use reconciler::Reconcile;
