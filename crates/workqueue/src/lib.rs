//! Work Queue
//!
//! The queueing half of a watch-queue-reconcile controller.
//!
//! - [`delta`]: encodes an `(ActionTag, ResourceKey)` pair into the opaque
//!   token carried by the queue, and decodes it back in the worker
//! - [`RateLimitingQueue`]: deduplicating queue with an in-flight set, so a
//!   key is never handed to two consumers at once
//! - [`rate_limiter`]: per-key backoff policies used by
//!   [`RateLimitingQueue::add_rate_limited`]
//!
//! # Example
//!
//! ```no_run
//! use workqueue::{delta, ActionTag, RateLimitingQueue, ResourceKey, WorkToken};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue: RateLimitingQueue<WorkToken> = RateLimitingQueue::with_default_rate_limiter();
//!
//! let key = ResourceKey::new(Some("default"), "nginx");
//! queue.add(delta::encode(ActionTag::Added, &key));
//!
//! if let Some(token) = queue.get().await {
//!     let (action, key) = delta::decode(&token)?;
//!     println!("{} {}", action, key);
//!     queue.forget(&token);
//!     queue.done(&token);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod delta;
pub mod error;
pub mod queue;
pub mod rate_limiter;

pub use backoff::FibonacciBackoff;
pub use delta::{ActionTag, ResourceKey, WorkToken};
pub use error::DecodeError;
pub use queue::{QueueItem, RateLimitingQueue};
pub use rate_limiter::{
    BucketRateLimiter, ItemExponentialRateLimiter, ItemFibonacciRateLimiter, MaxOfRateLimiter,
    RateLimiter,
};
