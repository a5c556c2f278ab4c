//! Work queue errors

use thiserror::Error;

/// Errors produced when a queue token cannot be turned back into an
/// `(ActionTag, ResourceKey)` pair.
///
/// These never happen for tokens built by [`crate::delta::encode`]; seeing one
/// means something other than the encoder put the token on the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Token has no `:` separating the action from the key
    #[error("token {0:?} has no action delimiter")]
    MissingDelimiter(String),

    /// Action or key is empty
    #[error("token {0:?} has an empty field")]
    EmptyField(String),

    /// Action is not one of Added, Updated, Deleted
    #[error("unknown action {0:?}")]
    UnknownAction(String),
}
