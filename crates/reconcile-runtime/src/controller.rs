//! Main controller implementation.
//!
//! This module contains the `Controller` struct that owns the cache, the work
//! queue and the handler, and walks them through the lifecycle:
//!
//! `Created → Syncing → Running → Draining → Stopped`
//!
//! - Syncing: the informer is started and the controller waits for the first
//!   full listing. A timeout, a stop signal or a dead event source aborts
//!   straight to `Stopped` with an error.
//! - Running: workers drain the queue until the stop signal arrives or the
//!   event source ends.
//! - Draining: the queue is shut down, in-flight items finish, every task is
//!   joined.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::fatal::{FatalEvent, FatalSink, TracingFatalSink};
use crate::reconciler::Reconcile;
use crate::worker::Worker;
use futures::Stream;
use informer::{EventHandler, Informer, SourceError, Store, SyncHandle, WatchEvent};
use kube::Resource;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use workqueue::{delta, ActionTag, RateLimitingQueue, ResourceKey, WorkToken};

/// Where a controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, nothing running
    Created,
    /// Waiting for the initial sync
    Syncing,
    /// Workers processing items
    Running,
    /// Stop requested, finishing in-flight items
    Draining,
    /// All tasks joined
    Stopped,
}

impl LifecycleState {
    /// Whether `next` directly follows `self`.
    ///
    /// The only shortcut is `Syncing → Stopped`, taken when the initial sync
    /// fails.
    #[must_use]
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Created, LifecycleState::Syncing)
                | (LifecycleState::Syncing, LifecycleState::Running)
                | (LifecycleState::Syncing, LifecycleState::Stopped)
                | (LifecycleState::Running, LifecycleState::Draining)
                | (LifecycleState::Draining, LifecycleState::Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Event handler that encodes every notification and adds it to the queue.
struct EnqueueHandler {
    queue: RateLimitingQueue<WorkToken>,
}

impl<K> EventHandler<K> for EnqueueHandler {
    fn on_event(&self, action: ActionTag, key: &ResourceKey, _obj: &K) {
        debug!("Enqueueing {} {}", action, key);
        self.queue.add(delta::encode(action, key));
    }
}

/// Watch-queue-reconcile controller for one resource type.
pub struct Controller<K, R> {
    config: ControllerConfig,
    store: Store<K>,
    queue: RateLimitingQueue<WorkToken>,
    reconciler: Arc<R>,
    fatal: Arc<dyn FatalSink>,
    state: watch::Sender<LifecycleState>,
}

impl<K, R> fmt::Debug for Controller<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.config.name)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl<K, R> Controller<K, R>
where
    K: Resource + Send + Sync + 'static,
    R: Reconcile<K>,
{
    /// Creates a new controller instance.
    ///
    /// Builds the store and the queue; nothing runs until [`run`](Self::run).
    pub fn new(config: ControllerConfig, reconciler: R) -> Result<Self, ControllerError> {
        config.validate()?;
        let queue = RateLimitingQueue::with_rate_limiter(config.rate_limiter.build());
        let (state, _) = watch::channel(LifecycleState::Created);
        Ok(Self {
            config,
            store: Store::new(),
            queue,
            reconciler: Arc::new(reconciler),
            fatal: Arc::new(TracingFatalSink),
            state,
        })
    }

    /// Replaces the default sink, which logs fatal events.
    #[must_use]
    pub fn with_fatal_sink(mut self, sink: impl FatalSink + 'static) -> Self {
        self.fatal = Arc::new(sink);
        self
    }

    /// Handle to the controller's cache.
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Handle to the controller's work queue.
    pub fn queue(&self) -> RateLimitingQueue<WorkToken> {
        self.queue.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver that observes every lifecycle transition.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn transition(&self, next: LifecycleState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            error!(
                "{} controller: unexpected transition {} -> {}",
                self.config.name, current, next
            );
            debug_assert!(false, "illegal lifecycle transition {} -> {}", current, next);
        }
        info!("{} controller: {} -> {}", self.config.name, current, next);
        self.state.send_replace(next);
    }

    /// Runs the controller until `shutdown` fires or the event source ends.
    ///
    /// Returns once every task has been joined. Fails if the initial sync
    /// does not complete, or if the event source ends while running.
    pub async fn run<S>(self, source: S, shutdown: CancellationToken) -> Result<(), ControllerError>
    where
        S: Stream<Item = Result<WatchEvent<K>, SourceError>> + Send + 'static,
    {
        info!("Starting {} controller", self.config.name);

        self.transition(LifecycleState::Syncing);
        let informer = Informer::new(self.store.clone());
        let mut sync = informer.sync_handle();
        let informer_shutdown = CancellationToken::new();
        let handler = EnqueueHandler {
            queue: self.queue.clone(),
        };
        let mut informer_task =
            tokio::spawn(informer.run(source, handler, informer_shutdown.clone()));

        if let Err(e) = self.wait_for_sync(&mut sync, &shutdown).await {
            informer_shutdown.cancel();
            self.queue.shutdown();
            if let Err(join_error) = informer_task.await {
                debug!("Informer task ended abnormally: {}", join_error);
            }
            if !matches!(e, ControllerError::SyncCancelled) {
                self.fatal.report(FatalEvent::ControllerFailed {
                    message: e.to_string(),
                });
            }
            self.transition(LifecycleState::Stopped);
            return Err(e);
        }

        self.transition(LifecycleState::Running);
        let mut workers = self.spawn_workers();

        let (result, informer_task) = tokio::select! {
            () = shutdown.cancelled() => {
                info!("{} controller: stop signal received", self.config.name);
                (Ok(()), Some(informer_task))
            }
            joined = &mut informer_task => {
                let message = match joined {
                    Ok(()) => "event source ended".to_string(),
                    Err(e) => format!("informer task failed: {}", e),
                };
                self.fatal.report(FatalEvent::ControllerFailed { message: message.clone() });
                (Err(ControllerError::Source(message)), None)
            }
        };

        self.transition(LifecycleState::Draining);
        self.queue.shutdown();
        informer_shutdown.cancel();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                self.fatal.report(FatalEvent::WorkerCrashed {
                    message: e.to_string(),
                });
            }
        }
        if let Some(task) = informer_task {
            join_informer(task).await;
        }

        self.transition(LifecycleState::Stopped);
        info!("{} controller stopped", self.config.name);
        result
    }

    async fn wait_for_sync(
        &self,
        sync: &mut SyncHandle,
        shutdown: &CancellationToken,
    ) -> Result<(), ControllerError> {
        info!("Waiting for {} cache to sync", self.config.name);
        let synced = async {
            match self.config.sync_timeout {
                Some(limit) => tokio::time::timeout(limit, sync.wait_for_sync())
                    .await
                    .map_err(|_| ControllerError::SyncTimeout(limit)),
                None => Ok(sync.wait_for_sync().await),
            }
        };

        tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(ControllerError::SyncCancelled),
            result = synced => match result? {
                true => {
                    info!("{} cache synced ({} objects)", self.config.name, self.store.len());
                    Ok(())
                }
                false => Err(ControllerError::Source(
                    "event source ended before the initial sync".to_string(),
                )),
            },
        }
    }

    fn spawn_workers(&self) -> JoinSet<()> {
        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                queue: self.queue.clone(),
                store: self.store.clone(),
                reconciler: Arc::clone(&self.reconciler),
                fatal: Arc::clone(&self.fatal),
                max_retries: self.config.max_retries,
            };
            workers.spawn(worker.run());
        }
        info!(
            "{} controller: started {} workers",
            self.config.name, self.config.workers
        );
        workers
    }
}

async fn join_informer(task: JoinHandle<()>) {
    if let Err(e) = task.await {
        error!("Informer task ended abnormally: {}", e);
    }
}
