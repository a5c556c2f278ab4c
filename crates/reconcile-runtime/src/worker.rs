//! Worker loop and retry policy.
//!
//! Each worker repeatedly takes an item off the queue, decodes it, looks the
//! key up in the store and runs the handler. Retry logic lives here rather
//! than in the handler:
//!
//! - success: forget the key's backoff history
//! - failure below the ceiling: log and requeue with backoff
//! - failure at the ceiling: forget, report to the fatal sink, drop
//!
//! A panicking handler counts as a failure.
//!
//! Whatever the outcome, the key is released with `done` so the next event
//! for it can be delivered.

use crate::fatal::{FatalEvent, FatalSink};
use crate::reconciler::Reconcile;
use futures::FutureExt;
use informer::Store;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};
use workqueue::{delta, DecodeError, RateLimitingQueue, WorkToken};

/// Result of one handler invocation.
#[derive(Debug)]
pub(crate) enum Outcome {
    Success,
    Failed(String),
    Malformed(DecodeError),
}

/// One of the controller's concurrent workers.
pub(crate) struct Worker<K, R> {
    pub(crate) id: usize,
    pub(crate) queue: RateLimitingQueue<WorkToken>,
    pub(crate) store: Store<K>,
    pub(crate) reconciler: Arc<R>,
    pub(crate) fatal: Arc<dyn FatalSink>,
    pub(crate) max_retries: u32,
}

impl<K, R> Worker<K, R>
where
    K: Send + Sync + 'static,
    R: Reconcile<K>,
{
    /// Processes items until the queue shuts down.
    pub(crate) async fn run(self) {
        debug!("Worker {} started", self.id);
        while self.process_next_item().await {}
        debug!("Worker {} stopped", self.id);
    }

    /// Handles a single item. Returns `false` once the queue is shut down
    /// and drained.
    pub(crate) async fn process_next_item(&self) -> bool {
        let Some(token) = self.queue.get().await else {
            return false;
        };

        let outcome = self.sync(&token).await;
        self.handle_outcome(&token, outcome);
        self.queue.done(&token);
        true
    }

    async fn sync(&self, token: &WorkToken) -> Outcome {
        let (action, key) = match delta::decode(token) {
            Ok(decoded) => decoded,
            Err(e) => return Outcome::Malformed(e),
        };

        let object = self.store.get(&key);
        debug!(
            "Worker {} reconciling {} {} (cached: {})",
            self.id,
            action,
            key,
            object.is_some()
        );

        // A panicking handler must not take the worker down with it
        let result = AssertUnwindSafe(self.reconciler.reconcile(action, &key, object))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("Worker {} caught a panic handling {}: {}", self.id, token, message);
                Outcome::Failed(format!("handler panicked: {}", message))
            }
        }
    }

    fn handle_outcome(&self, token: &WorkToken, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.queue.forget(token),
            Outcome::Failed(error) => {
                let attempts = self.queue.num_requeues(token).saturating_add(1);
                if attempts < self.max_retries {
                    warn!(
                        "Error syncing {} (attempt {}/{}): {}",
                        token, attempts, self.max_retries, error
                    );
                    self.queue.add_rate_limited(token.clone());
                } else {
                    self.queue.forget(token);
                    self.fatal.report(FatalEvent::RetriesExhausted {
                        token: token.clone(),
                        attempts,
                        error,
                    });
                }
            }
            Outcome::Malformed(error) => {
                self.queue.forget(token);
                self.fatal.report(FatalEvent::DecodeFailed {
                    token: token.clone(),
                    error,
                });
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
