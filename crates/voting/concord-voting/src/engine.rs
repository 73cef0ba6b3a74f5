//! The voting engine: proposal/voter registries, ballot casting with
//! liquid-democracy delegation cascades, and finalisation.

use crate::anomaly::{detect_anomalies, VotingAnomaly};
use crate::error::VotingError;
use crate::types::{Decision, ProposalStatus, Tally, Vote, Voter, VotingProposal, VotingRule};
use crate::validation::validate_vote;
use concord_core::{ConcordEvent, EventBus};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Owns every registered proposal, voter, and cast ballot.
pub struct VotingEngine {
    events: Arc<EventBus>,
    proposals: DashMap<Uuid, VotingProposal>,
    voters: DashMap<Uuid, Voter>,
    votes: DashMap<Uuid, Vec<Vote>>, // keyed by proposal id
}

impl VotingEngine {
    /// Construct an empty engine.
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { events, proposals: DashMap::new(), voters: DashMap::new(), votes: DashMap::new() }
    }

    /// Register a new proposal, open for voting.
    pub fn create_proposal(&self, proposal: VotingProposal) {
        self.votes.insert(proposal.id, Vec::new());
        self.proposals.insert(proposal.id, proposal);
    }

    /// Register a voter, defaulting weight/reputation/credits if new.
    pub fn register_voter(&self, voter: Voter) {
        self.voters.insert(voter.id, voter);
    }

    /// `delegate(from, to)`: rejected if it would create a cycle (walking
    /// `to`'s `delegatedTo` chain looking for `from`).
    pub fn delegate(&self, from: Uuid, to: Uuid) -> Result<(), VotingError> {
        if self.would_cycle(from, to) {
            return Err(VotingError::DelegationCycle { from, to });
        }

        let previous = self.voters.get(&from).and_then(|v| v.delegated_to);
        if let Some(previous) = previous {
            if let Some(mut old_target) = self.voters.get_mut(&previous) {
                old_target.delegates.remove(&from);
            }
        }

        self.voters.get_mut(&from).ok_or(VotingError::VoterNotFound(from))?.delegated_to = Some(to);
        self.voters.get_mut(&to).ok_or(VotingError::VoterNotFound(to))?.delegates.insert(from);
        Ok(())
    }

    fn would_cycle(&self, from: Uuid, to: Uuid) -> bool {
        let mut current = Some(to);
        while let Some(id) = current {
            if id == from {
                return true;
            }
            current = self.voters.get(&id).and_then(|v| v.delegated_to);
        }
        false
    }

    /// Cast `vote`. Under `liquid-democracy`, also cascades identical votes
    /// (same decision, each delegate's own weight) to every transitive
    /// delegate of the voter.
    pub fn cast_vote(&self, vote: Vote) -> Result<(), VotingError> {
        let proposal = self.proposals.get(&vote.proposal_id).ok_or(VotingError::ProposalNotFound(vote.proposal_id))?;
        if proposal.status != ProposalStatus::Open {
            return Err(VotingError::ProposalNotOpen(vote.proposal_id));
        }
        if chrono::Utc::now() >= proposal.deadline {
            return Err(VotingError::DeadlinePassed(vote.proposal_id));
        }
        let rule = proposal.rule;
        drop(proposal);

        let voter = self.voters.get(&vote.voter_id).ok_or(VotingError::VoterNotFound(vote.voter_id))?.clone();
        validate_vote(rule, &voter, &vote)?;

        let mut votes = self.votes.get_mut(&vote.proposal_id).expect("votes entry created with proposal");
        if votes.iter().any(|existing| existing.voter_id == vote.voter_id) {
            return Err(VotingError::AlreadyVoted { voter: vote.voter_id, proposal: vote.proposal_id });
        }
        votes.push(vote.clone());
        drop(votes);
        self.events.publish(ConcordEvent::MessageReceived { message_id: vote.id, from: vote.voter_id });

        if rule == VotingRule::LiquidDemocracy {
            self.cascade_delegates(&vote, vote.voter_id);
        }
        Ok(())
    }

    fn cascade_delegates(&self, original: &Vote, delegator: Uuid) {
        let delegates: Vec<Uuid> = match self.voters.get(&delegator) {
            Some(v) => v.delegates.iter().copied().collect(),
            None => return,
        };
        for delegate_id in delegates {
            let weight = match self.voters.get(&delegate_id) {
                Some(v) => v.weight,
                None => continue,
            };
            let cascaded = Vote {
                id: Uuid::new_v4(),
                proposal_id: original.proposal_id,
                voter_id: delegate_id,
                decision: original.decision,
                weight,
                quadratic_strength: None,
                approved_options: original.approved_options.clone(),
                timestamp: original.timestamp,
            };
            if let Some(mut votes) = self.votes.get_mut(&original.proposal_id) {
                votes.push(cascaded.clone());
            }
            self.cascade_delegates(&cascaded, delegate_id);
        }
    }

    /// Tally the current votes for `proposal_id`.
    #[must_use]
    pub fn tally(&self, proposal_id: Uuid) -> Tally {
        let votes = self.votes.get(&proposal_id);
        let votes = match votes {
            Some(v) => v,
            None => return Tally::default(),
        };

        let mut tally = Tally::default();
        let mut seen_voters = std::collections::HashSet::new();
        for vote in votes.iter() {
            seen_voters.insert(vote.voter_id);
            if let Some(options) = &vote.approved_options {
                tally.approve_weight += options.len() as f64;
            } else {
                match vote.decision {
                    Decision::Approve => tally.approve_weight += vote.weight,
                    Decision::Reject => tally.reject_weight += vote.weight,
                }
            }
        }
        tally.distinct_voters = seen_voters.len();
        tally
    }

    /// Finalise a proposal: compute the tally, decide pass/fail against
    /// `minParticipation`/`passingThreshold`, deduct quadratic voice
    /// credits, and mark the proposal closed.
    pub fn finalize(&self, proposal_id: Uuid) -> Result<(ProposalStatus, Tally, Vec<VotingAnomaly>), VotingError> {
        let mut proposal = self.proposals.get_mut(&proposal_id).ok_or(VotingError::ProposalNotFound(proposal_id))?;
        let rule = proposal.rule;
        let min_participation = proposal.min_participation;
        let passing_threshold = proposal.passing_threshold;

        let tally = self.tally(proposal_id);
        let total_voters = self.voters.len();
        let passes = tally.participation_rate(total_voters) >= min_participation
            && tally.approval_ratio() >= passing_threshold;

        proposal.status = if passes { ProposalStatus::Passed } else { ProposalStatus::Rejected };
        let status = proposal.status;
        drop(proposal);

        if rule == VotingRule::Quadratic {
            if let Some(votes) = self.votes.get(&proposal_id) {
                for vote in votes.iter() {
                    if let Some(strength) = vote.quadratic_strength {
                        let cost = (strength as f64) * (strength as f64);
                        if let Some(mut voter) = self.voters.get_mut(&vote.voter_id) {
                            voter.voice_credits = (voter.voice_credits - cost).max(0.0);
                        }
                    }
                }
            }
        }

        let anomalies = self.votes.get(&proposal_id).map(|v| detect_anomalies(&v, &tally)).unwrap_or_default();
        for anomaly in &anomalies {
            self.events.publish(ConcordEvent::Threat { agent_id: None, reason: format!("{anomaly:?}") });
        }

        info!(%proposal_id, ?status, "proposal finalised");
        Ok((status, tally, anomalies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn proposal(rule: VotingRule, min_participation: f64, passing_threshold: f64) -> VotingProposal {
        VotingProposal {
            id: Uuid::new_v4(),
            title: "test".into(),
            content: "content".into(),
            proposer_id: Uuid::new_v4(),
            deadline: chrono::Utc::now() + Duration::hours(1),
            rule,
            min_participation,
            passing_threshold,
            status: ProposalStatus::Open,
        }
    }

    fn vote_for(proposal_id: Uuid, voter_id: Uuid, decision: Decision, weight: f64) -> Vote {
        Vote {
            id: Uuid::new_v4(),
            proposal_id,
            voter_id,
            decision,
            weight,
            quadratic_strength: None,
            approved_options: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn simple_majority_passes_with_enough_approval() {
        let engine = VotingEngine::new(Arc::new(EventBus::default()));
        let proposal = proposal(VotingRule::SimpleMajority, 0.5, 0.5);
        let pid = proposal.id;
        engine.create_proposal(proposal);

        let voters: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for v in &voters {
            engine.register_voter(Voter::new(*v));
        }
        engine.cast_vote(vote_for(pid, voters[0], Decision::Approve, 1.0)).unwrap();
        engine.cast_vote(vote_for(pid, voters[1], Decision::Approve, 1.0)).unwrap();
        engine.cast_vote(vote_for(pid, voters[2], Decision::Reject, 1.0)).unwrap();

        let (status, _tally, _anomalies) = engine.finalize(pid).unwrap();
        assert_eq!(status, ProposalStatus::Passed);
    }

    #[test]
    fn delegation_cascades_to_delegate_vote() {
        let engine = VotingEngine::new(Arc::new(EventBus::default()));
        let proposal = proposal(VotingRule::LiquidDemocracy, 0.0, 0.5);
        let pid = proposal.id;
        engine.create_proposal(proposal);

        let delegator = Uuid::new_v4();
        let delegate = Uuid::new_v4();
        engine.register_voter(Voter::new(delegator));
        engine.register_voter(Voter::new(delegate));
        engine.delegate(delegate, delegator).unwrap(); // delegate delegates to delegator

        engine.cast_vote(vote_for(pid, delegator, Decision::Approve, 1.0)).unwrap();

        let tally = engine.tally(pid);
        assert_eq!(tally.distinct_voters, 2);
        assert_eq!(tally.approve_weight, 2.0);
    }

    #[test]
    fn delegation_cycle_is_rejected() {
        let engine = VotingEngine::new(Arc::new(EventBus::default()));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        engine.register_voter(Voter::new(a));
        engine.register_voter(Voter::new(b));
        engine.delegate(a, b).unwrap();
        assert!(engine.delegate(b, a).is_err());
    }

    #[test]
    fn second_vote_from_the_same_voter_is_rejected() {
        let engine = VotingEngine::new(Arc::new(EventBus::default()));
        let proposal = proposal(VotingRule::SimpleMajority, 0.0, 0.5);
        let pid = proposal.id;
        engine.create_proposal(proposal);

        let voter_id = Uuid::new_v4();
        engine.register_voter(Voter::new(voter_id));
        engine.cast_vote(vote_for(pid, voter_id, Decision::Approve, 1.0)).unwrap();

        let result = engine.cast_vote(vote_for(pid, voter_id, Decision::Reject, 1.0));
        assert!(matches!(result, Err(VotingError::AlreadyVoted { .. })));
    }

    #[test]
    fn vote_after_deadline_is_rejected() {
        let engine = VotingEngine::new(Arc::new(EventBus::default()));
        let mut expired = proposal(VotingRule::SimpleMajority, 0.0, 0.5);
        expired.deadline = chrono::Utc::now() - Duration::milliseconds(1);
        let pid = expired.id;
        engine.create_proposal(expired);

        let voter_id = Uuid::new_v4();
        engine.register_voter(Voter::new(voter_id));
        let result = engine.cast_vote(vote_for(pid, voter_id, Decision::Approve, 1.0));
        assert!(matches!(result, Err(VotingError::DeadlinePassed(_))));
    }

    #[test]
    fn quadratic_deducts_voice_credits_at_finalisation() {
        let engine = VotingEngine::new(Arc::new(EventBus::default()));
        let proposal = proposal(VotingRule::Quadratic, 0.0, 0.0);
        let pid = proposal.id;
        engine.create_proposal(proposal);

        let voter_id = Uuid::new_v4();
        engine.register_voter(Voter::new(voter_id));
        let mut vote = vote_for(pid, voter_id, Decision::Approve, 1.0);
        vote.quadratic_strength = Some(3); // cost 9
        engine.cast_vote(vote).unwrap();
        engine.finalize(pid).unwrap();

        let voter = engine.voters.get(&voter_id).unwrap();
        assert_eq!(voter.voice_credits, 91.0);
    }
}
