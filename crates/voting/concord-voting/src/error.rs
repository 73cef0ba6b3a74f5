//! Voting-local error type, translated into [`concord_core::ConcordError`]
//! at the crate boundary.

use concord_core::ConcordError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while casting votes, delegating, or finalising proposals.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VotingError {
    /// No proposal with this id is known.
    #[error("proposal {0} not found")]
    ProposalNotFound(Uuid),

    /// No voter with this id is registered.
    #[error("voter {0} not found")]
    VoterNotFound(Uuid),

    /// The proposal is not open for voting (already finalised or closed).
    #[error("proposal {0} is not open")]
    ProposalNotOpen(Uuid),

    /// `weighted`: `vote.weight` exceeded `voter.weight`.
    #[error("vote weight {requested} exceeds voter weight {allowed}")]
    WeightExceeded { requested: f64, allowed: f64 },

    /// `quadratic`: `strength^2` exceeded remaining voice credits.
    #[error("quadratic cost {cost} exceeds remaining voice credits {available}")]
    InsufficientVoiceCredits { cost: f64, available: f64 },

    /// `stake-weighted`: `vote.weight` exceeded the voter's stake on this proposal.
    #[error("vote weight {requested} exceeds stake {allowed} on this proposal")]
    StakeExceeded { requested: f64, allowed: f64 },

    /// `liquid-democracy`: a voter who has delegated cannot cast a direct vote.
    #[error("voter {0} has delegated and cannot cast a direct vote")]
    VoterHasDelegated(Uuid),

    /// `delegate(from, to)` would create a cycle.
    #[error("delegation from {from} to {to} would create a cycle")]
    DelegationCycle { from: Uuid, to: Uuid },

    /// The voter already has a recorded vote on this proposal.
    #[error("voter {voter} has already voted on proposal {proposal}")]
    AlreadyVoted { voter: Uuid, proposal: Uuid },

    /// The proposal's deadline has passed.
    #[error("proposal {0} is past its voting deadline")]
    DeadlinePassed(Uuid),
}

impl From<VotingError> for ConcordError {
    fn from(err: VotingError) -> Self {
        match err {
            VotingError::ProposalNotFound(_) | VotingError::VoterNotFound(_) => {
                ConcordError::validation(err.to_string())
            }
            VotingError::ProposalNotOpen(_) => ConcordError::conflict(err.to_string()),
            VotingError::WeightExceeded { .. }
            | VotingError::InsufficientVoiceCredits { .. }
            | VotingError::StakeExceeded { .. }
            | VotingError::VoterHasDelegated(_)
            | VotingError::DelegationCycle { .. }
            | VotingError::AlreadyVoted { .. } => ConcordError::validation(err.to_string()),
            VotingError::DeadlinePassed(_) => ConcordError::conflict(err.to_string()),
        }
    }
}
