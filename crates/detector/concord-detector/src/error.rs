//! Crate error type and its translation into `ConcordError`.

use concord_core::ConcordError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the malicious-behaviour detector.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// No reputation record exists for the given agent.
    #[error("unknown agent {0}")]
    UnknownAgent(Uuid),

    /// The agent is quarantined and the requested operation is disallowed.
    #[error("agent {0} is quarantined")]
    Quarantined(Uuid),

    /// A rehabilitation request was made for an agent that isn't quarantined.
    #[error("agent {0} is not quarantined")]
    NotQuarantined(Uuid),
}

impl From<DetectorError> for ConcordError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::UnknownAgent(id) => ConcordError::validation(format!("unknown agent {id}")),
            DetectorError::Quarantined(id) => ConcordError::auth(format!("agent {id} is quarantined")),
            DetectorError::NotQuarantined(id) => ConcordError::validation(format!("agent {id} is not quarantined")),
        }
    }
}
