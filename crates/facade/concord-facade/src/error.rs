//! Façade-local error type, translated into [`concord_core::ConcordError`]
//! at the crate boundary.

use concord_core::ConcordError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the integration façade's higher-level operations.
#[derive(Error, Debug, Clone)]
pub enum FacadeError {
    /// No agent with this id has been registered.
    #[error("agent {0} not registered")]
    UnknownAgent(Uuid),

    /// The agent's trust level does not permit the requested operation.
    #[error("agent {0} lacks the capability required for this operation")]
    CapabilityDenied(Uuid),

    /// A committed proposal's content did not decode as the expected
    /// payload shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The underlying security, consensus, voting, or state component
    /// rejected the call.
    #[error(transparent)]
    Component(#[from] ConcordError),
}

impl From<concord_security::SecurityError> for FacadeError {
    fn from(err: concord_security::SecurityError) -> Self {
        Self::Component(err.into())
    }
}

impl From<concord_voting::VotingError> for FacadeError {
    fn from(err: concord_voting::VotingError) -> Self {
        Self::Component(err.into())
    }
}

impl From<FacadeError> for ConcordError {
    fn from(err: FacadeError) -> Self {
        match err {
            FacadeError::UnknownAgent(_) | FacadeError::CapabilityDenied(_) => {
                ConcordError::auth(err.to_string())
            }
            FacadeError::MalformedPayload(_) => ConcordError::validation(err.to_string()),
            FacadeError::Component(inner) => inner,
        }
    }
}
