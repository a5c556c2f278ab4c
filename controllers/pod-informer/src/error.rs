//! Controller-specific error types.
//!
//! Errors the pod informer binary can exit with. Everything that goes wrong
//! inside the watch-queue-reconcile loop surfaces as [`ControllerError::Runtime`].

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Pod Informer Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Controller runtime error
    #[error("Controller runtime error: {0}")]
    Runtime(#[from] reconcile_runtime::ControllerError),
}
