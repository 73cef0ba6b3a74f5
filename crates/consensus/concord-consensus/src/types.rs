//! Core data types shared by the PBFT engine, the Raft engine, and
//! view-change/leader election.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identifies an agent participating in consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// Generate a fresh random agent id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A PBFT view number: a logical epoch identifying the current leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewNumber(pub u64);

impl ViewNumber {
    /// The view following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// A Raft term number: a logical epoch identifying an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term(pub u64);

impl Term {
    /// The term following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// A sequence number ordering proposals within a PBFT view.
pub type SeqNumber = u64;

/// `{id, content, proposerId, timestamp, contentHash}`.
///
/// Immutable once submitted: a `Proposal` has no setters after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique proposal identifier.
    pub id: Uuid,
    /// Opaque content bytes (the command to agree on).
    pub content: Vec<u8>,
    /// The agent that submitted this proposal.
    pub proposer_id: AgentId,
    /// Submission timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// SHA-256 digest of `content`.
    pub content_hash: [u8; 32],
}

impl Proposal {
    /// Construct a proposal, computing its content hash.
    #[must_use]
    pub fn new(proposer_id: AgentId, content: Vec<u8>) -> Self {
        let content_hash = Sha256::digest(&content).into();
        Self {
            id: Uuid::new_v4(),
            content,
            proposer_id,
            timestamp: chrono::Utc::now(),
            content_hash,
        }
    }

    /// Verify the stored hash still matches the content.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let computed: [u8; 32] = Sha256::digest(&self.content).into();
        computed == self.content_hash
    }
}

/// The three phases of one PBFT decision, plus the two view-change phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PbftPhase {
    /// Leader announces the proposal for `(view, seq)`.
    PrePrepare,
    /// A node endorses the leader's pre-prepare.
    Prepare,
    /// A node has observed `2f` prepares and is ready to commit.
    Commit,
    /// A node requests replacing the leader for a new view.
    ViewChange,
    /// The new leader announces the start of a view.
    NewView,
}

/// `{phase, view, seq, digest, payload?, timestamp, signature, senderId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PbftMessage {
    /// Protocol phase this message belongs to.
    pub phase: PbftPhase,
    /// The view the sender believes is current.
    pub view: ViewNumber,
    /// Sequence number of the proposal under agreement.
    pub seq: SeqNumber,
    /// Digest of the proposal content.
    pub digest: [u8; 32],
    /// Payload carried only by pre-prepare (the proposal itself) and
    /// new-view (reconstructed pre-prepares) messages.
    pub payload: Option<Vec<u8>>,
    /// Send timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Ed25519 signature over the canonical encoding of this message.
    pub signature: Vec<u8>,
    /// The sending agent.
    pub sender_id: AgentId,
}

/// `{index, term, command, timestamp, committed}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log. `(index, term)` identifies the entry.
    pub index: u64,
    /// The term in which this entry was appended by its leader.
    pub term: Term,
    /// Opaque command bytes.
    pub command: Vec<u8>,
    /// Append timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Whether this entry has been committed (stored on a majority under
    /// the leader's current term).
    pub committed: bool,
}

/// Raft node role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftRole {
    /// Replicates the leader's log.
    Follower,
    /// Soliciting votes for a new term.
    Candidate,
    /// Accepts client commands and replicates them.
    Leader,
}

/// Outcome of a consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusOutcome {
    /// The proposal reached quorum and was committed.
    Committed,
    /// The round could not complete (timeout, no quorum).
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_hash_matches_content() {
        let proposal = Proposal::new(AgentId::new(), b"hello".to_vec());
        assert!(proposal.is_valid());
    }

    #[test]
    fn tampering_with_content_invalidates_hash() {
        let mut proposal = Proposal::new(AgentId::new(), b"hello".to_vec());
        proposal.content = b"goodbye".to_vec();
        assert!(!proposal.is_valid());
    }

    #[test]
    fn view_and_term_increment() {
        assert_eq!(ViewNumber(3).next(), ViewNumber(4));
        assert_eq!(Term(9).next(), Term(10));
    }
}
