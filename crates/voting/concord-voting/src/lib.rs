//! Multi-rule proposal voting: simple majority, weighted, quadratic,
//! approval, liquid-democracy delegation, and stake-weighted ballots, with
//! anomaly detection over the cast vote set.

pub mod anomaly;
pub mod engine;
pub mod error;
pub mod types;
pub mod validation;

pub use anomaly::{detect_anomalies, VotingAnomaly};
pub use engine::VotingEngine;
pub use error::VotingError;
pub use types::{Decision, ProposalStatus, Tally, Vote, Voter, VotingProposal, VotingRule};
pub use validation::validate_vote;
