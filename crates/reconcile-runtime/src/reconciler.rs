//! Reconcile handler contract.

use async_trait::async_trait;
use std::sync::Arc;
use workqueue::{ActionTag, ResourceKey};

/// Business logic run for every work item.
///
/// The worker looks `key` up in the cache before calling and passes the
/// snapshot as `object`. `None` means the object no longer exists, which is
/// the deletion path and not an error.
///
/// Delivery is at-least-once: the same key can be reconciled again after a
/// failure, after a duplicate event or after a relist. Implementations must be
/// idempotent, so a second call with an unchanged cache has no further effect.
#[async_trait]
pub trait Reconcile<K>: Send + Sync + 'static
where
    K: Send + Sync + 'static,
{
    /// Error returned on failure; failed items are retried with backoff.
    type Error: std::fmt::Display + Send + Sync + 'static;

    /// Reconciles one key.
    async fn reconcile(
        &self,
        action: ActionTag,
        key: &ResourceKey,
        object: Option<Arc<K>>,
    ) -> Result<(), Self::Error>;
}
