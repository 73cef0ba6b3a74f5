//! Per-rule vote validation.

use crate::error::VotingError;
use crate::types::{Vote, Voter, VotingRule};

/// Validate `vote` against `voter` under `rule`, per the validation table:
/// `weighted` bounds weight by the voter's registered weight; `quadratic`
/// bounds `strength^2` by remaining voice credits; `stake-weighted` bounds
/// weight by the voter's stake on the proposal; `liquid-democracy` forbids a
/// direct vote from a voter who has delegated; `simple-majority` and
/// `approval` always pass.
pub fn validate_vote(rule: VotingRule, voter: &Voter, vote: &Vote) -> Result<(), VotingError> {
    match rule {
        VotingRule::SimpleMajority | VotingRule::Approval => Ok(()),
        VotingRule::Weighted => {
            if vote.weight > voter.weight {
                Err(VotingError::WeightExceeded { requested: vote.weight, allowed: voter.weight })
            } else {
                Ok(())
            }
        }
        VotingRule::Quadratic => {
            let strength = vote.quadratic_strength.unwrap_or(0) as f64;
            let cost = strength * strength;
            if cost > voter.voice_credits {
                Err(VotingError::InsufficientVoiceCredits { cost, available: voter.voice_credits })
            } else {
                Ok(())
            }
        }
        VotingRule::StakeWeighted => {
            let stake = voter.stakes.get(&vote.proposal_id).copied().unwrap_or(0.0);
            if vote.weight > stake {
                Err(VotingError::StakeExceeded { requested: vote.weight, allowed: stake })
            } else {
                Ok(())
            }
        }
        VotingRule::LiquidDemocracy => {
            if voter.delegated_to.is_some() {
                Err(VotingError::VoterHasDelegated(voter.id))
            } else {
                Ok(())
            }
        }
    }
}
