//! Local cache mirror.
//!
//! Holds the last observed state of every watched object. Writers are the
//! informer task; readers are the workers. Entries are handed out as
//! `Arc<K>` snapshots so readers never hold the lock while they work and
//! never see a half-written object.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use workqueue::ResourceKey;

/// Thread-safe map from [`ResourceKey`] to the last observed object.
///
/// Cloning yields another handle to the same store.
pub struct Store<K> {
    entries: Arc<RwLock<HashMap<ResourceKey, Arc<K>>>>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K> std::fmt::Debug for Store<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("len", &self.len()).finish()
    }
}

impl<K> Store<K> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ResourceKey, Arc<K>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ResourceKey, Arc<K>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached object for `key`.
    ///
    /// `None` means the object no longer exists (or was never seen); that is
    /// not an error.
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<K>> {
        self.read().get(key).cloned()
    }

    /// Stores `obj` under `key`, returning the previous entry.
    pub fn put(&self, key: ResourceKey, obj: impl Into<Arc<K>>) -> Option<Arc<K>> {
        self.write().insert(key, obj.into())
    }

    /// Removes `key`, returning the removed entry.
    pub fn delete(&self, key: &ResourceKey) -> Option<Arc<K>> {
        self.write().remove(key)
    }

    /// Whether `key` is cached.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.read().contains_key(key)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All cached keys, in no particular order.
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.read().keys().cloned().collect()
    }

    /// Snapshot of every cached object.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.read().values().cloned().collect()
    }

    /// Drops every entry whose key is not in `keep` and returns the dropped
    /// entries.
    ///
    /// Used after a relist: anything cached before the relist that the
    /// relist did not mention has been deleted remotely.
    pub fn prune(&self, keep: &HashSet<ResourceKey>) -> Vec<(ResourceKey, Arc<K>)> {
        let mut entries = self.write();
        let stale: Vec<ResourceKey> = entries
            .keys()
            .filter(|key| !keep.contains(*key))
            .cloned()
            .collect();
        stale
            .into_iter()
            .filter_map(|key| entries.remove(&key).map(|obj| (key, obj)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> ResourceKey {
        ResourceKey::from(raw)
    }

    #[test]
    fn test_put_get_delete() {
        let store: Store<String> = Store::new();

        assert!(store.get(&key("ns/foo")).is_none());
        assert!(store.put(key("ns/foo"), "v1".to_string()).is_none());
        assert_eq!(store.get(&key("ns/foo")).as_deref(), Some(&"v1".to_string()));

        let previous = store.put(key("ns/foo"), "v2".to_string());
        assert_eq!(previous.as_deref(), Some(&"v1".to_string()));
        assert_eq!(store.get(&key("ns/foo")).as_deref(), Some(&"v2".to_string()));

        assert_eq!(store.delete(&key("ns/foo")).as_deref(), Some(&"v2".to_string()));
        assert!(store.get(&key("ns/foo")).is_none());
        // Deleting again is harmless
        assert!(store.delete(&key("ns/foo")).is_none());
    }

    #[test]
    fn test_snapshot_survives_overwrite() {
        let store: Store<String> = Store::new();
        store.put(key("ns/foo"), "v1".to_string());

        let snapshot = store.get(&key("ns/foo")).unwrap();
        store.put(key("ns/foo"), "v2".to_string());

        assert_eq!(*snapshot, "v1");
    }

    #[test]
    fn test_prune_returns_stale_entries() {
        let store: Store<u32> = Store::new();
        store.put(key("ns/a"), 1);
        store.put(key("ns/b"), 2);
        store.put(key("ns/c"), 3);

        let keep: HashSet<_> = [key("ns/a"), key("ns/c")].into_iter().collect();
        let removed = store.prune(&keep);

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, key("ns/b"));
        assert_eq!(*removed[0].1, 2);
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&key("ns/b")));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store: Store<usize> = Store::new();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    store.put(key(&format!("ns/obj-{}", i % 10)), i);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        let _ = store.get(&key(&format!("ns/obj-{}", i % 10)));
                        let _ = store.list();
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.len(), 10);
        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys.first(), Some(&key("ns/obj-0")));
    }
}
