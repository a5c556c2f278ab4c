//! Fatal-error reporting.
//!
//! Failures the controller gives up on are handed to a [`FatalSink`]. The
//! controller keeps running after reporting; what the sink does with the
//! report (log it, count it, page someone) is up to the host program.

use std::fmt;
use workqueue::{DecodeError, WorkToken};

/// A failure the controller will not retry on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum FatalEvent {
    /// Handler kept failing until the retry ceiling; the key was dropped
    RetriesExhausted {
        /// Item that was dropped
        token: WorkToken,
        /// Failures seen, including the last one
        attempts: u32,
        /// Last handler error
        error: String,
    },

    /// A queue item could not be decoded; it was dropped
    DecodeFailed {
        /// The malformed item
        token: WorkToken,
        /// Why decoding failed
        error: DecodeError,
    },

    /// A worker task ended abnormally
    WorkerCrashed {
        /// Join error
        message: String,
    },

    /// The controller could not start or lost its event source
    ControllerFailed {
        /// Error returned to the caller
        message: String,
    },
}

impl fmt::Display for FatalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalEvent::RetriesExhausted { token, attempts, error } => write!(
                f,
                "dropping {} out of the queue after {} attempts: {}",
                token, attempts, error
            ),
            FatalEvent::DecodeFailed { token, error } => {
                write!(f, "dropping malformed item {}: {}", token, error)
            }
            FatalEvent::WorkerCrashed { message } => write!(f, "worker crashed: {}", message),
            FatalEvent::ControllerFailed { message } => write!(f, "controller failed: {}", message),
        }
    }
}

/// Receives failures the controller gave up on.
pub trait FatalSink: Send + Sync {
    /// Reports one failure. Must not block.
    fn report(&self, event: FatalEvent);
}

/// Logs every report at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFatalSink;

impl FatalSink for TracingFatalSink {
    fn report(&self, event: FatalEvent) {
        tracing::error!("{}", event);
    }
}
