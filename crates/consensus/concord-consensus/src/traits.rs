//! Narrow interfaces the consensus engines depend on. Concrete
//! implementations (network transport, state-machine apply, crypto) are
//! injected at construction by `concord-facade`, which is the only crate
//! that names every concrete type and so avoids cyclic dependencies
//! between the consensus, state, and security crates.

use crate::raft::rpc::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use crate::types::{AgentId, PbftMessage, Proposal};
use async_trait::async_trait;
use concord_core::ConcordResult;
use serde::{Deserialize, Serialize};

/// Pluggable transport. The core does not define the on-wire byte layout;
/// implementations must preserve all fields of the logical message schemas.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Broadcast a message to every known participant.
    async fn broadcast(&self, message: PbftMessage) -> ConcordResult<()>;

    /// Send a message to a single participant.
    async fn send_to(&self, to: AgentId, message: PbftMessage) -> ConcordResult<()>;
}

/// Signing and verification over the canonical byte encoding of a message.
/// Key management itself lives in `concord-security`; this trait is the
/// narrow slice the consensus engine needs.
pub trait ConsensusCrypto: Send + Sync {
    /// Sign the given bytes with this node's signing key.
    fn sign(&self, bytes: &[u8]) -> Vec<u8>;

    /// Verify a signature over `bytes`, purportedly by `signer`.
    fn verify(&self, signer: AgentId, bytes: &[u8], signature: &[u8]) -> bool;
}

/// The callback invoked once a proposal reaches quorum. Implemented by the
/// state machine; the consensus engine never applies operations itself.
#[async_trait]
pub trait ProposalSink: Send + Sync {
    /// Apply a committed proposal at the given sequence number.
    async fn apply_committed(&self, proposal: &Proposal, seq: u64) -> ConcordResult<()>;
}

/// A pluggable leader-selection policy, used by both the PBFT view-change
/// module and (for metrics bookkeeping) the Raft engine.
pub trait LeaderElection: Send + Sync {
    /// Choose a leader for the given view/term out of the active candidate
    /// set, which must be non-empty.
    fn select_leader(&self, view: u64, candidates: &[AgentId]) -> AgentId;

    /// Record caller-provided telemetry about a candidate (reputation,
    /// availability, performance, stake). Per the open questions in the
    /// design notes, the source of these numbers is caller-provided; this
    /// trait only records and reads them back.
    fn update_candidate_metrics(&self, candidate: AgentId, metrics: CandidateMetrics);
}

/// Caller-provided telemetry about a leader-election candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetrics {
    /// Reputation score in `[0, 1]`.
    pub reputation: f64,
    /// Availability score in `[0, 1]`.
    pub availability: f64,
    /// Performance score in `[0, 1]`.
    pub performance: f64,
    /// Stake weight, unbounded but compared relatively.
    pub stake: f64,
    /// Consecutive terms/views this candidate has led.
    pub consecutive_terms: u32,
}

impl Default for CandidateMetrics {
    fn default() -> Self {
        Self { reputation: 0.5, availability: 0.5, performance: 0.5, stake: 0.0, consecutive_terms: 0 }
    }
}

/// RPC transport for the Raft engine: unlike PBFT's fire-and-forget
/// broadcast, Raft's RPCs are request/response.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    /// Send `RequestVote` to a peer and await its reply.
    async fn request_vote(&self, peer: AgentId, args: RequestVoteArgs) -> ConcordResult<RequestVoteReply>;

    /// Send `AppendEntries` to a peer and await its reply.
    async fn append_entries(&self, peer: AgentId, args: AppendEntriesArgs) -> ConcordResult<AppendEntriesReply>;
}

/// Summary statistics exposed via the `Observable` metrics surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConsensusStats {
    /// Total proposals committed.
    pub committed: u64,
    /// Total rounds aborted (timeout, no quorum).
    pub aborted: u64,
    /// Total view changes completed.
    pub view_changes: u64,
}
