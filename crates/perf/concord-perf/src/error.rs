//! Crate error type and its translation into `ConcordError`.

use concord_core::ConcordError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the performance optimiser.
#[derive(Debug, Error)]
pub enum PerfError {
    /// A speculation was resolved for a proposal that was never speculated on.
    #[error("no speculation recorded for proposal {0}")]
    NoSpeculation(Uuid),

    /// A batch was requested from an empty queue.
    #[error("batch queue is empty")]
    EmptyQueue,
}

impl From<PerfError> for ConcordError {
    fn from(err: PerfError) -> Self {
        match err {
            PerfError::NoSpeculation(id) => ConcordError::validation(format!("no speculation recorded for proposal {id}")),
            PerfError::EmptyQueue => ConcordError::validation("batch queue is empty"),
        }
    }
}
