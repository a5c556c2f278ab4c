//! Informer loop.
//!
//! Drives an event source, keeps the [`Store`] in step with it and forwards
//! each change to an [`EventHandler`]. The store write always completes before
//! the handler is called, so anything the handler enqueues can rely on the
//! store already reflecting the event.

use crate::error::SourceError;
use crate::event::{EventHandler, WatchEvent};
use crate::key::key_for;
use crate::store::Store;
use futures::{Stream, StreamExt};
use kube::Resource;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use workqueue::{ActionTag, ResourceKey};

/// Read side of the informer's "initial sync done" flag.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    rx: watch::Receiver<bool>,
}

impl SyncHandle {
    /// Whether the first full listing has been applied to the store.
    pub fn has_synced(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits for the first full listing.
    ///
    /// Returns `false` if the informer finished without ever syncing.
    pub async fn wait_for_sync(&mut self) -> bool {
        self.rx.wait_for(|synced| *synced).await.is_ok()
    }
}

/// Applies watch events to a [`Store`] and notifies an [`EventHandler`].
#[derive(Debug)]
pub struct Informer<K> {
    store: Store<K>,
    synced: watch::Sender<bool>,
    /// Keys seen since the last `Restarted`, while a relist is in progress
    relist: Option<HashSet<ResourceKey>>,
}

impl<K> Informer<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// Creates an informer that mirrors into `store`.
    #[must_use]
    pub fn new(store: Store<K>) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            store,
            synced,
            relist: None,
        }
    }

    /// The store this informer writes to.
    pub fn store(&self) -> &Store<K> {
        &self.store
    }

    /// Handle for observing the initial sync.
    pub fn sync_handle(&self) -> SyncHandle {
        SyncHandle {
            rx: self.synced.subscribe(),
        }
    }

    /// Whether the first full listing has been applied.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Consumes `source` until it ends or `shutdown` fires.
    ///
    /// Source errors are logged and skipped: sources retry on their own, and
    /// a transient watch failure must not take the informer down.
    pub async fn run<S, H>(mut self, source: S, handler: H, shutdown: CancellationToken)
    where
        S: Stream<Item = Result<WatchEvent<K>, SourceError>> + Send,
        H: EventHandler<K>,
    {
        let mut stream = Box::pin(source);
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("Informer cancelled");
                    return;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => self.apply(event, &handler),
                Some(Err(e)) => warn!("Event source error (continuing): {}", e),
                None => {
                    info!("Event source finished");
                    return;
                }
            }
        }
    }

    /// Applies a single event.
    pub fn apply<H: EventHandler<K>>(&mut self, event: WatchEvent<K>, handler: &H) {
        match event {
            WatchEvent::Restarted => {
                debug!("Relist started");
                self.relist = Some(HashSet::new());
            }
            WatchEvent::Listed(obj) => {
                if let Some(key) = self.upsert(obj, handler) {
                    if let Some(seen) = self.relist.as_mut() {
                        seen.insert(key);
                    }
                }
            }
            WatchEvent::Synced => {
                if let Some(seen) = self.relist.take() {
                    for (key, obj) in self.store.prune(&seen) {
                        debug!("{} missing from relist, treating as deleted", key);
                        handler.on_event(ActionTag::Deleted, &key, &obj);
                    }
                }
                if !*self.synced.borrow() {
                    info!("Initial sync complete ({} objects)", self.store.len());
                    self.synced.send_replace(true);
                }
            }
            WatchEvent::Applied(obj) => {
                self.upsert(obj, handler);
            }
            WatchEvent::Deleted(obj) => {
                let key = match key_for(&obj) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("Skipping delete event: {}", e);
                        return;
                    }
                };
                // Report the last state we knew about, falling back to the
                // tombstone carried by the event.
                match self.store.delete(&key) {
                    Some(last) => handler.on_event(ActionTag::Deleted, &key, &last),
                    None => handler.on_event(ActionTag::Deleted, &key, &obj),
                }
            }
        }
    }

    fn upsert<H: EventHandler<K>>(&self, obj: K, handler: &H) -> Option<ResourceKey> {
        let key = match key_for(&obj) {
            Ok(key) => key,
            Err(e) => {
                warn!("Skipping event: {}", e);
                return None;
            }
        };
        let obj = Arc::new(obj);
        let action = match self.store.put(key.clone(), Arc::clone(&obj)) {
            Some(_) => ActionTag::Updated,
            None => ActionTag::Added,
        };
        handler.on_event(action, &key, &obj);
        Some(key)
    }
}
