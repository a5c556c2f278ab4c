//! Reconciliation logic for watched resources.
//!
//! The reconciler only reports what happened: each work item becomes one log
//! line carrying the object's creation and deletion timestamps.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;
use reconcile_runtime::Reconcile;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;
use workqueue::{ActionTag, ResourceKey};

/// Logs every change to a resource of type `K`.
pub struct LogReconciler<K> {
    kind: &'static str,
    _resource: PhantomData<fn() -> K>,
}

impl<K> LogReconciler<K> {
    /// Creates a reconciler that names objects as `kind` in its output.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            _resource: PhantomData,
        }
    }
}

#[async_trait]
impl<K> Reconcile<K> for LogReconciler<K>
where
    K: Resource + Send + Sync + 'static,
{
    type Error = Infallible;

    async fn reconcile(
        &self,
        action: ActionTag,
        key: &ResourceKey,
        object: Option<Arc<K>>,
    ) -> Result<(), Self::Error> {
        info!("{}", describe(self.kind, action, key, object.as_deref()));
        Ok(())
    }
}

/// Builds the log line for one work item.
pub fn describe<K: Resource>(
    kind: &str,
    action: ActionTag,
    key: &ResourceKey,
    object: Option<&K>,
) -> String {
    let Some(object) = object else {
        return format!("{} {} does not exist", kind, key);
    };
    let meta = object.meta();
    let name = meta.name.as_deref().unwrap_or("<unknown>");
    let created = timestamp(meta.creation_timestamp.as_ref());
    let deleted = timestamp(meta.deletion_timestamp.as_ref());

    match action {
        ActionTag::Added => format!("Added {} {}, created at {}", kind, name, created),
        ActionTag::Updated => format!(
            "Updated {} {}, created at {}, deleted at {}",
            kind, name, created, deleted
        ),
        ActionTag::Deleted => format!("Deleted {} {}, deleted at {}", kind, name, deleted),
    }
}

fn timestamp(time: Option<&Time>) -> String {
    time.map_or_else(|| "-".to_string(), |t| t.0.to_string())
}
