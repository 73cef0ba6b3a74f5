//! Shared error taxonomy for the concord workspace.
//!
//! Every crate translates its own local error type into [`ConcordError`] at
//! its public boundary, so callers only ever match on one error enum
//! regardless of which component raised it.

use std::fmt;
use thiserror::Error;
use serde::{Deserialize, Serialize};

/// The error taxonomy described in the core's error-handling design.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcordError {
    /// Unknown sender, invalid signature, invalid certificate, capability denied.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Malformed message, view mismatch, out-of-window sequence.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Cannot reach consensus: insufficient active non-malicious agents, or timeout.
    #[error("quorum error: {0}")]
    Quorum(String),

    /// A nonce was seen before; message discarded.
    #[error("replay detected: {0}")]
    Replay(String),

    /// Caller throttled by rate limiting.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// A circuit breaker is open and rejecting calls until its recovery timeout.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// A state operation conflicted with another and lost resolution.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed request: missing target, unknown executor, and similar.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unrecoverable error: crypto subsystem unavailable, key rotation failure,
    /// unrecoverable state corruption. Triggers `emergency_shutdown`.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage/persistence errors from a pluggable backend.
    #[error("storage error: {0}")]
    Storage(String),

    /// Transport failures from the pluggable network layer.
    #[error("network error: {0}")]
    Network(String),

    /// An operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Catch-all for errors that don't fit another variant.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ConcordError {
    /// Create an authentication error.
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Self::Auth(msg.to_string())
    }

    /// Create a protocol error.
    pub fn protocol<T: fmt::Display>(msg: T) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Create a quorum error.
    pub fn quorum<T: fmt::Display>(msg: T) -> Self {
        Self::Quorum(msg.to_string())
    }

    /// Create a replay error.
    pub fn replay<T: fmt::Display>(msg: T) -> Self {
        Self::Replay(msg.to_string())
    }

    /// Create a rate-limit error.
    pub fn rate_limit<T: fmt::Display>(msg: T) -> Self {
        Self::RateLimit(msg.to_string())
    }

    /// Create a circuit-open error.
    pub fn circuit_open<T: fmt::Display>(msg: T) -> Self {
        Self::CircuitOpen(msg.to_string())
    }

    /// Create a conflict error.
    pub fn conflict<T: fmt::Display>(msg: T) -> Self {
        Self::Conflict(msg.to_string())
    }

    /// Create a validation error.
    pub fn validation<T: fmt::Display>(msg: T) -> Self {
        Self::Validation(msg.to_string())
    }

    /// Create a fatal error.
    pub fn fatal<T: fmt::Display>(msg: T) -> Self {
        Self::Fatal(msg.to_string())
    }

    /// Create a configuration error.
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Create a storage error.
    pub fn storage<T: fmt::Display>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Create a network error.
    pub fn network<T: fmt::Display>(msg: T) -> Self {
        Self::Network(msg.to_string())
    }

    /// Create a timeout error.
    pub fn timeout<T: fmt::Display>(msg: T) -> Self {
        Self::Timeout(msg.to_string())
    }

    /// Create an internal error.
    pub fn internal<T: fmt::Display>(msg: T) -> Self {
        Self::Internal(msg.to_string())
    }

    /// Create a serialization error.
    pub fn serialization<T: fmt::Display>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Transient errors are safe to retry under a bounded policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit(_) | Self::CircuitOpen(_)
        )
    }

    /// Caller-caused errors (bad input, denied capability).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Auth(_) | Self::Replay(_)
        )
    }

    /// Server-side failures that indicate a degraded or broken node.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::Storage(_) | Self::Fatal(_))
    }
}

/// Result type alias used throughout the workspace.
pub type ConcordResult<T> = Result<T, ConcordError>;

impl From<std::io::Error> for ConcordError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ConcordError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for ConcordError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<uuid::Error> for ConcordError {
    fn from(err: uuid::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<toml::de::Error> for ConcordError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ConcordError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_produce_matching_variants() {
        let err = ConcordError::quorum("no quorum");
        assert_eq!(err, ConcordError::Quorum("no quorum".to_string()));
    }

    #[test]
    fn classification_matches_taxonomy() {
        let transient = ConcordError::network("peer unreachable");
        assert!(transient.is_retryable());
        assert!(!transient.is_client_error());

        let client = ConcordError::validation("missing target");
        assert!(client.is_client_error());
        assert!(!client.is_retryable());

        let fatal = ConcordError::fatal("crypto subsystem down");
        assert!(fatal.is_server_error());
    }

    #[test]
    fn io_error_converts_to_internal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let converted: ConcordError = io_err.into();
        assert!(matches!(converted, ConcordError::Internal(_)));
    }
}
