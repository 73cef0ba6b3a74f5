//! Consensus-local error type, translated into [`concord_core::ConcordError`]
//! at the crate boundary.

use crate::types::{AgentId, ViewNumber};
use concord_core::ConcordError;
use thiserror::Error;

/// Errors raised by the PBFT and Raft engines.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsensusError {
    /// `startConsensus`/`appendCommand` called on a node that is not leader.
    #[error("node is not the leader for view/term")]
    NotLeader,

    /// Fewer than `2f+1` active non-malicious agents remain.
    #[error("insufficient active agents to reach quorum")]
    NoQuorum,

    /// The round did not complete before its timeout.
    #[error("consensus round timed out waiting for quorum")]
    Timeout,

    /// A message referenced a view older than the node's current view.
    #[error("stale view: message view {message_view:?} < current {current_view:?}")]
    StaleView { message_view: ViewNumber, current_view: ViewNumber },

    /// A sequence number fell outside the accepted window.
    #[error("sequence {seq} is out of window")]
    SeqOutOfWindow { seq: u64 },

    /// A pre-prepare arrived from a sender who is not the leader of its view.
    #[error("pre-prepare from {sender} is not the leader for this view")]
    NotLeaderSender { sender: AgentId },

    /// The sender is not a known, active participant.
    #[error("unknown sender {0}")]
    UnknownSender(AgentId),

    /// The sender has been marked malicious and is ignored.
    #[error("sender {0} is marked malicious")]
    MaliciousSender(AgentId),

    /// Signature verification failed.
    #[error("signature verification failed")]
    InvalidSignature,

    /// Two pre-prepares for the same `(view, seq)` carried different digests.
    #[error("conflicting pre-prepares for view {view:?} seq {seq}")]
    ConflictingProposal { view: ViewNumber, seq: u64 },

    /// The cluster has fewer than `3f+1` members, so consensus cannot start.
    #[error("cluster size below minimum for Byzantine fault tolerance")]
    BelowMinimumClusterSize,

    /// Raft: append entries rejected due to log mismatch.
    #[error("log mismatch at index {index}")]
    LogMismatch { index: u64 },
}

impl From<ConsensusError> for ConcordError {
    fn from(err: ConsensusError) -> Self {
        match err {
            ConsensusError::NotLeader
            | ConsensusError::NotLeaderSender { .. }
            | ConsensusError::UnknownSender(_)
            | ConsensusError::MaliciousSender(_)
            | ConsensusError::InvalidSignature => ConcordError::auth(err.to_string()),
            ConsensusError::NoQuorum | ConsensusError::BelowMinimumClusterSize => {
                ConcordError::quorum(err.to_string())
            }
            ConsensusError::Timeout => ConcordError::timeout(err.to_string()),
            ConsensusError::StaleView { .. }
            | ConsensusError::SeqOutOfWindow { .. }
            | ConsensusError::ConflictingProposal { .. }
            | ConsensusError::LogMismatch { .. } => ConcordError::protocol(err.to_string()),
        }
    }
}
