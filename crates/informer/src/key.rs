//! Resource key derivation.

use crate::error::KeyError;
use kube::Resource;
use workqueue::ResourceKey;

/// Derives the `namespace/name` key of a Kubernetes object.
///
/// Cluster-scoped objects key on their name alone. Objects that only carry a
/// `generateName` have not been persisted yet and cannot be keyed.
pub fn key_for<K: Resource>(obj: &K) -> Result<ResourceKey, KeyError> {
    let meta = obj.meta();
    let name = meta.name.as_deref().ok_or(KeyError::MissingName)?;
    Ok(ResourceKey::new(meta.namespace.as_deref(), name))
}
