//! Event source model.
//!
//! An event source is any `Stream<Item = Result<WatchEvent<K>, SourceError>>`.
//! The shape follows `kube_runtime::watcher::Event`: a (re)list is announced by
//! [`WatchEvent::Restarted`], followed by one [`WatchEvent::Listed`] per
//! existing object and closed by [`WatchEvent::Synced`]. Incremental changes
//! arrive as [`WatchEvent::Applied`] and [`WatchEvent::Deleted`].

use workqueue::{ActionTag, ResourceKey};

/// One notification from an event source.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    /// A full listing is starting
    Restarted,
    /// Object present in the current listing
    Listed(K),
    /// The listing is complete
    Synced,
    /// Object created or modified
    Applied(K),
    /// Object removed
    Deleted(K),
}

/// Receives classified notifications after the store has been updated.
///
/// Called on the informer task, so implementations must not block; the
/// usual implementation encodes the notification and adds it to a queue.
pub trait EventHandler<K>: Send + Sync {
    /// Handles one notification.
    ///
    /// For [`ActionTag::Deleted`], `obj` is the last known state of the object.
    fn on_event(&self, action: ActionTag, key: &ResourceKey, obj: &K);
}

impl<K, F> EventHandler<K> for F
where
    F: Fn(ActionTag, &ResourceKey, &K) + Send + Sync,
{
    fn on_event(&self, action: ActionTag, key: &ResourceKey, obj: &K) {
        self(action, key, obj);
    }
}
