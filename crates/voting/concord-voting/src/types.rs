//! Core data types for the voting subsystem.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// The six pluggable ballot rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VotingRule {
    /// One voter, one vote; no weighting.
    SimpleMajority,
    /// Vote weight bounded by the voter's registered weight.
    Weighted,
    /// Cost `= strength^2`, bounded by the voter's voice credits.
    Quadratic,
    /// Voters approve any number of options; tallied like simple majority.
    Approval,
    /// Voters may delegate their vote to another voter.
    LiquidDemocracy,
    /// Vote weight bounded by the voter's stake on this proposal.
    StakeWeighted,
}

/// Lifecycle state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// Accepting votes.
    Open,
    /// Finalised, passed.
    Passed,
    /// Finalised, did not pass.
    Rejected,
    /// Closed without finalisation (e.g. withdrawn).
    Closed,
}

/// `{id, title, content, proposerId, deadline, rule, minParticipation,
/// passingThreshold, status}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingProposal {
    /// Unique proposal id.
    pub id: Uuid,
    /// Human-readable title.
    pub title: String,
    /// Full proposal content.
    pub content: String,
    /// The agent that submitted this proposal.
    pub proposer_id: Uuid,
    /// Voting closes at this time.
    pub deadline: chrono::DateTime<chrono::Utc>,
    /// Ballot rule governing this proposal's votes.
    pub rule: VotingRule,
    /// Minimum fraction of registered voters who must vote for the result
    /// to be binding.
    pub min_participation: f64,
    /// Fraction of `approveWeight / (approveWeight + rejectWeight)` required
    /// to pass.
    pub passing_threshold: f64,
    /// Current lifecycle state.
    pub status: ProposalStatus,
}

/// `{id, weight, reputation, voiceCredits, delegates, delegatedTo?, stakes}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    /// Unique voter id.
    pub id: Uuid,
    /// Registered voting weight (used by the `weighted` rule).
    pub weight: f64,
    /// Reputation score in `[0, 1]`.
    pub reputation: f64,
    /// Remaining quadratic-voting voice credits.
    pub voice_credits: f64,
    /// Voters who have delegated to this voter.
    pub delegates: HashSet<Uuid>,
    /// The voter this voter has delegated to, if any.
    pub delegated_to: Option<Uuid>,
    /// Stake committed to each proposal (used by `stake-weighted`).
    pub stakes: HashMap<Uuid, f64>,
}

impl Voter {
    /// A freshly registered voter with default weight/reputation/credits.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            weight: 1.0,
            reputation: 0.5,
            voice_credits: 100.0,
            delegates: HashSet::new(),
            delegated_to: None,
            stakes: HashMap::new(),
        }
    }
}

/// A decision on a proposal: approve or reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Vote in favour.
    Approve,
    /// Vote against.
    Reject,
}

/// A single cast ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    /// Unique vote id.
    pub id: Uuid,
    /// The proposal this vote is for.
    pub proposal_id: Uuid,
    /// The voter who cast this vote.
    pub voter_id: Uuid,
    /// Approve or reject.
    pub decision: Decision,
    /// Vote weight, interpretation depending on the proposal's rule.
    pub weight: f64,
    /// For `quadratic` only: the chosen vote strength, whose squared cost
    /// is drawn from the voter's voice credits.
    pub quadratic_strength: Option<u32>,
    /// For `approval` only: the set of options this ballot approves.
    pub approved_options: Option<Vec<String>>,
    /// Cast timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Tally totals accumulated while finalising a proposal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Tally {
    /// Total weight cast for `Approve` (or, under `approval`, the total
    /// unit-weight across approved options).
    pub approve_weight: f64,
    /// Total weight cast for `Reject`.
    pub reject_weight: f64,
    /// Count of distinct voters who cast a ballot.
    pub distinct_voters: usize,
}

impl Tally {
    /// Fraction of registered voters who participated.
    #[must_use]
    pub fn participation_rate(&self, total_voters: usize) -> f64 {
        if total_voters == 0 {
            return 0.0;
        }
        self.distinct_voters as f64 / total_voters as f64
    }

    /// `approveWeight / (approveWeight + rejectWeight)`, or `0.0` if no
    /// weight was cast at all.
    #[must_use]
    pub fn approval_ratio(&self) -> f64 {
        let total = self.approve_weight + self.reject_weight;
        if total == 0.0 {
            0.0
        } else {
            self.approve_weight / total
        }
    }
}
