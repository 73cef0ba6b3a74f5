//! Pluggable agreement protocols for a cluster of agents: three-phase PBFT
//! with view-change leader replacement, and leader-based Raft as a simpler
//! alternative path. Neither engine names a concrete transport, crypto
//! provider, or state-machine sink; those are injected by the caller
//! (`concord-facade`), which keeps this crate free of cyclic dependencies on
//! the state-machine and security crates.

pub mod canonical;
pub mod error;
pub mod pbft;
pub mod raft;
pub mod traits;
pub mod types;
pub mod view_change;

pub use error::ConsensusError;
pub use pbft::{PbftEngine, RoundKey};
pub use raft::rpc::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
pub use raft::RaftEngine;
pub use traits::{CandidateMetrics, ConsensusCrypto, ConsensusStats, LeaderElection, ProposalSink, RaftTransport, Transport};
pub use types::{
    AgentId, ConsensusOutcome, LogEntry, PbftMessage, PbftPhase, Proposal, RaftRole, SeqNumber, Term, ViewNumber,
};
pub use view_change::{
    policies::{HybridElection, PerformanceElection, ReputationElection, RoundRobinElection, StakeWeightedElection},
    NewViewMessage, ViewChangeCoordinator, ViewChangeMessage, ViewChangeReason, ViewChangeTransport,
};
