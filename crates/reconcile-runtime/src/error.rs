//! Controller errors.
//!
//! Handler failures never show up here: the worker pool contains them. These
//! are the failures that change the controller's control flow.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::Controller`].
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The initial sync did not complete in time
    #[error("Timed out after {0:?} waiting for the cache to sync")]
    SyncTimeout(Duration),

    /// The stop signal arrived before the initial sync completed
    #[error("Stopped before the cache finished syncing")]
    SyncCancelled,

    /// The event source ended or its task failed
    #[error("Event source stopped: {0}")]
    Source(String),
}
