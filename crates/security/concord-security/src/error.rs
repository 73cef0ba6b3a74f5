//! Crate error type and its translation into `ConcordError`.

use concord_core::ConcordError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the security manager.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// No identity registered for the given agent.
    #[error("unknown agent {0}")]
    UnknownAgent(Uuid),

    /// The agent's certificate failed validation.
    #[error("invalid certificate for agent {0}")]
    InvalidCertificate(Uuid),

    /// The agent's identity has been revoked.
    #[error("agent {0} is revoked")]
    Revoked(Uuid),

    /// Requested capabilities exceed the caller's trust level.
    #[error("capability denied for agent {0}")]
    CapabilityDenied(Uuid),

    /// No session exists for the given id.
    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    /// A nonce was reused.
    #[error("replay detected")]
    ReplayDetected,

    /// Message exceeded its time-to-live.
    #[error("message expired")]
    Expired,

    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,

    /// Payload decryption failed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Caller exceeded its rate limit.
    #[error("rate limited")]
    RateLimited,

    /// The per-agent circuit breaker is open.
    #[error("circuit open for agent {0}")]
    CircuitOpen(Uuid),
}

impl From<SecurityError> for ConcordError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::UnknownAgent(id) => ConcordError::validation(format!("unknown agent {id}")),
            SecurityError::InvalidCertificate(id) => ConcordError::auth(format!("invalid certificate for agent {id}")),
            SecurityError::Revoked(id) => ConcordError::auth(format!("agent {id} is revoked")),
            SecurityError::CapabilityDenied(id) => ConcordError::auth(format!("capability denied for agent {id}")),
            SecurityError::SessionNotFound(id) => ConcordError::validation(format!("session {id} not found")),
            SecurityError::ReplayDetected => ConcordError::replay("nonce reused"),
            SecurityError::Expired => ConcordError::auth("message expired"),
            SecurityError::InvalidSignature => ConcordError::auth("invalid signature"),
            SecurityError::DecryptionFailed => ConcordError::auth("decryption failed"),
            SecurityError::RateLimited => ConcordError::rate_limit("agent exceeded rate limit"),
            SecurityError::CircuitOpen(id) => ConcordError::circuit_open(format!("circuit open for agent {id}")),
        }
    }
}
