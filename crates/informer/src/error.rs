//! Informer errors

use thiserror::Error;

/// Errors yielded by an event source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The underlying watch failed; sources are expected to retry on their own
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl From<kube_runtime::watcher::Error> for SourceError {
    fn from(e: kube_runtime::watcher::Error) -> Self {
        SourceError::Watch(e.to_string())
    }
}

/// Errors deriving a key from an object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Object has no `metadata.name`
    #[error("object has no name")]
    MissingName,
}
