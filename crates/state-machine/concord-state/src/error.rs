//! State-machine-local error type, translated into
//! [`concord_core::ConcordError`] at the crate boundary.

use concord_core::ConcordError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while applying or replicating state operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// `create` on a target that already exists.
    #[error("target {0:?} already exists")]
    TargetExists(String),

    /// `update`/`delete`/`execute` on a target that does not exist.
    #[error("target {0:?} does not exist")]
    TargetMissing(String),

    /// An `execute` operation named a function outside the whitelist, or
    /// its argument did not match the function's expected shape.
    #[error("invalid execute payload for target {0:?}")]
    InvalidExecutePayload(String),

    /// The operation's `dependencies` have not all been applied yet; it
    /// has been parked and will be retried once they resolve.
    #[error("operation {0} parked pending dependencies")]
    Parked(Uuid),

    /// Two ops on the same target conflicted and resolution was required.
    #[error("conflicting operations on target {0:?}")]
    Conflict(String),

    /// No snapshot exists with the requested id.
    #[error("snapshot {0} not found")]
    SnapshotNotFound(Uuid),
}

impl From<StateError> for ConcordError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::TargetExists(_)
            | StateError::TargetMissing(_)
            | StateError::InvalidExecutePayload(_) => ConcordError::validation(err.to_string()),
            StateError::Parked(_) => ConcordError::conflict(err.to_string()),
            StateError::Conflict(_) => ConcordError::conflict(err.to_string()),
            StateError::SnapshotNotFound(_) => ConcordError::storage(err.to_string()),
        }
    }
}
