//! Rate-limited work queue.
//!
//! Items are deduplicated by key: adding a key that is already pending
//! replaces the pending item instead of queueing a second copy. A key handed
//! out by [`RateLimitingQueue::get`] stays "in flight" until
//! [`RateLimitingQueue::done`] is called; adds for that key in the meantime
//! are parked and only become eligible once the current holder is done. That
//! is what keeps two workers from ever processing the same key at once.

use crate::delta::WorkToken;
use crate::rate_limiter::{ItemExponentialRateLimiter, RateLimiter};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Something that can be placed on a [`RateLimitingQueue`].
pub trait QueueItem: Clone + Send + 'static {
    /// Key used for deduplication, in-flight tracking and backoff history.
    fn dedup_key(&self) -> &str;
}

impl QueueItem for WorkToken {
    fn dedup_key(&self) -> &str {
        self.key_part()
    }
}

impl QueueItem for String {
    fn dedup_key(&self) -> &str {
        self
    }
}

#[derive(Debug)]
struct State<T> {
    /// Keys eligible for `get`, oldest first
    order: VecDeque<String>,
    /// Latest item per pending key, eligible or parked behind an in-flight key
    pending: HashMap<String, T>,
    /// Keys currently held by a consumer
    processing: HashSet<String>,
    shutting_down: bool,
}

impl<T> State<T> {
    fn pop(&mut self) -> Option<T> {
        while let Some(key) = self.order.pop_front() {
            if let Some(item) = self.pending.remove(&key) {
                self.processing.insert(key);
                return Some(item);
            }
        }
        None
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter>,
    shutdown: CancellationToken,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deduplicating work queue with per-key backoff.
///
/// Cloning the queue yields another handle to the same queue.
pub struct RateLimitingQueue<T: QueueItem> {
    inner: Arc<Inner<T>>,
}

impl<T: QueueItem> Clone for RateLimitingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: QueueItem> std::fmt::Debug for RateLimitingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RateLimitingQueue")
            .field("eligible", &state.order.len())
            .field("pending", &state.pending.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

impl<T: QueueItem> RateLimitingQueue<T> {
    /// Creates a queue that backs off failed items with `rate_limiter`.
    pub fn new(rate_limiter: impl RateLimiter + 'static) -> Self {
        Self::with_rate_limiter(Box::new(rate_limiter))
    }

    /// Creates a queue from an already boxed rate limiter.
    #[must_use]
    pub fn with_rate_limiter(rate_limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    order: VecDeque::new(),
                    pending: HashMap::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                rate_limiter,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Creates a queue with exponential per-item backoff (5ms up to 1000s).
    #[must_use]
    pub fn with_default_rate_limiter() -> Self {
        Self::new(ItemExponentialRateLimiter::default())
    }

    /// Adds an item. Never blocks.
    ///
    /// If the key is already pending, the pending item is replaced and keeps
    /// its place in line. If the key is in flight, the item waits until the
    /// current holder calls [`done`](Self::done). Ignored after shutdown.
    pub fn add(&self, item: T) {
        let mut state = self.inner.lock();
        if state.shutting_down {
            debug!("Queue shutting down, dropping {}", item.dedup_key());
            return;
        }

        let key = item.dedup_key().to_string();
        let in_flight = state.processing.contains(&key);
        let eligible = match state.pending.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                trace!("Coalescing {} with pending item", key);
                entry.insert(item);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(item);
                if in_flight {
                    trace!("{} is in flight, parking until done", key);
                }
                !in_flight
            }
        };

        if eligible {
            state.order.push_back(key);
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Waits for the next item and marks its key as in flight.
    ///
    /// Returns `None` once the queue has been shut down and has no eligible
    /// items left.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            {
                let mut state = self.inner.lock();
                if let Some(item) = state.pop() {
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
                // Register before releasing the lock so an add racing with us
                // cannot slip its wakeup in between.
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Releases the in-flight marker for the item's key.
    ///
    /// A re-add that arrived while the key was in flight becomes eligible
    /// immediately.
    pub fn done(&self, item: &T) {
        let key = item.dedup_key();
        let mut state = self.inner.lock();
        if state.processing.remove(key) && state.pending.contains_key(key) {
            state.order.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clears the backoff history of the item's key.
    pub fn forget(&self, item: &T) {
        self.inner.rate_limiter.forget(item.dedup_key());
    }

    /// Number of times the item's key has been requeued since it was last
    /// forgotten.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner.rate_limiter.num_requeues(item.dedup_key())
    }

    /// Requeues the item after the rate limiter's delay for its key.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.inner.rate_limiter.when(item.dedup_key());
        self.add_after(item, delay);
    }

    /// Adds the item once `delay` has elapsed.
    ///
    /// A zero delay adds immediately. Delayed adds still waiting when the queue
    /// shuts down are dropped. Must be called from within a Tokio runtime.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        debug!("Requeueing {} in {:?}", item.dedup_key(), delay);
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = weak.upgrade() {
                        RateLimitingQueue { inner }.add(item);
                    }
                }
            }
        });
    }

    /// Stops accepting new items.
    ///
    /// Items already eligible are still handed out; once none are left,
    /// [`get`](Self::get) returns `None`. Every waiting consumer is woken.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        debug!("Shutting down work queue");
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Number of items eligible for [`get`](Self::get).
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether no item is eligible for [`get`](Self::get).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{encode, ActionTag, ResourceKey};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::timeout;

    fn token(raw: &str) -> WorkToken {
        WorkToken::from_raw(raw)
    }

    fn new_queue() -> RateLimitingQueue<WorkToken> {
        RateLimitingQueue::new(ItemExponentialRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_get_done_then_blocks() {
        let queue = new_queue();

        queue.add(token("Added:ns/foo"));
        let item = queue.get().await;
        assert_eq!(item, Some(token("Added:ns/foo")));
        queue.done(&token("Added:ns/foo"));

        // Empty queue: get must wait for the next add
        assert!(timeout(Duration::from_secs(5), queue.get()).await.is_err());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add(token("Updated:ns/foo"));
        assert_eq!(consumer.await.unwrap(), Some(token("Updated:ns/foo")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_adds_are_coalesced() {
        let queue = new_queue();

        queue.add(token("Added:ns/foo"));
        queue.add(token("Added:ns/foo"));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.get().await, Some(token("Added:ns/foo")));
        assert!(timeout(Duration::from_secs(1), queue.get()).await.is_err());
    }

    #[tokio::test]
    async fn test_last_writer_wins_for_pending_key() {
        let queue = new_queue();
        let key = ResourceKey::new(Some("ns"), "foo");

        queue.add(encode(ActionTag::Added, &key));
        queue.add(token("Added:ns/other"));
        queue.add(encode(ActionTag::Deleted, &key));

        // Still first in line, but carries the latest action
        assert_eq!(queue.get().await, Some(encode(ActionTag::Deleted, &key)));
        assert_eq!(queue.get().await, Some(token("Added:ns/other")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readd_while_in_flight_is_deferred() {
        let queue = new_queue();

        queue.add(token("Added:ns/foo"));
        let first = queue.get().await.unwrap();

        queue.add(token("Updated:ns/foo"));
        assert!(queue.is_empty(), "in-flight key must not be eligible");
        assert!(timeout(Duration::from_secs(1), queue.get()).await.is_err());

        queue.done(&first);
        assert_eq!(queue.get().await, Some(token("Updated:ns/foo")));
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_then_signals() {
        let queue = new_queue();

        queue.add(token("Added:ns/foo"));
        queue.shutdown();

        assert_eq!(queue.get().await, Some(token("Added:ns/foo")));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_add_after_shutdown_is_ignored() {
        let queue = new_queue();
        queue.shutdown();
        queue.add(token("Added:ns/foo"));

        assert!(queue.is_shutting_down());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiting_consumers() {
        let queue = new_queue();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::task::yield_now().await;

        queue.shutdown();
        for consumer in consumers {
            assert_eq!(consumer.await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_parked_item_drains_after_shutdown() {
        let queue = new_queue();

        queue.add(token("Added:ns/foo"));
        let first = queue.get().await.unwrap();
        queue.add(token("Updated:ns/foo"));
        queue.shutdown();

        queue.done(&first);
        assert_eq!(queue.get().await, Some(token("Updated:ns/foo")));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_backs_off() {
        let queue = new_queue();
        let item = token("Added:ns/bar");

        queue.add_rate_limited(item.clone());
        assert_eq!(queue.num_requeues(&item), 1);
        assert!(queue.is_empty());

        // First retry after 5ms
        assert_eq!(
            timeout(Duration::from_millis(6), queue.get()).await.unwrap(),
            Some(item.clone())
        );
        queue.done(&item);

        // Second retry after 10ms, not before
        queue.add_rate_limited(item.clone());
        assert!(timeout(Duration::from_millis(9), queue.get()).await.is_err());
        assert_eq!(queue.get().await, Some(item.clone()));
        assert_eq!(queue.num_requeues(&item), 2);

        queue.forget(&item);
        assert_eq!(queue.num_requeues(&item), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_add_dropped_on_shutdown() {
        let queue = new_queue();

        queue.add_after(token("Added:ns/foo"), Duration::from_secs(10));
        queue.shutdown();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_key_never_in_flight_twice() {
        let queue = new_queue();
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let overlap = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(AtomicUsize::new(0));

        let consumers: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                let in_flight = Arc::clone(&in_flight);
                let overlap = Arc::clone(&overlap);
                let processed = Arc::clone(&processed);
                tokio::spawn(async move {
                    while let Some(item) = queue.get().await {
                        let key = item.dedup_key().to_string();
                        if !in_flight.lock().unwrap().insert(key.clone()) {
                            overlap.store(true, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        in_flight.lock().unwrap().remove(&key);
                        processed.fetch_add(1, Ordering::SeqCst);
                        queue.done(&item);
                    }
                })
            })
            .collect();

        for round in 0..200 {
            let key = ResourceKey::new(Some("ns"), &format!("pod-{}", round % 4));
            queue.add(encode(ActionTag::Updated, &key));
            if round % 10 == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shutdown();
        for consumer in consumers {
            consumer.await.unwrap();
        }

        assert!(!overlap.load(Ordering::SeqCst), "a key was handed to two consumers");
        assert!(processed.load(Ordering::SeqCst) >= 4);
    }
}
