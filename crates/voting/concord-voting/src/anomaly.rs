//! Voting-pattern anomaly detection: coordinated voting, extreme ratios, and
//! single-voter dominance.

use crate::types::{Tally, Vote};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A flagged anomaly in a proposal's vote set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VotingAnomaly {
    /// Two votes landed less than one second apart.
    CoordinatedVoting { first: Uuid, second: Uuid, gap_ms: i64 },
    /// `approve/reject` exceeded 10 or fell below 0.1.
    ExtremeRatio { ratio: f64 },
    /// A single voter's weight was more than 10% of all weight cast.
    SingleVoterDominance { voter_id: Uuid, share: f64 },
}

/// Scan `votes` (already filtered to one proposal) for anomalies.
#[must_use]
pub fn detect_anomalies(votes: &[Vote], tally: &Tally) -> Vec<VotingAnomaly> {
    let mut anomalies = Vec::new();

    let mut sorted: Vec<&Vote> = votes.iter().collect();
    sorted.sort_by_key(|v| v.timestamp);
    for pair in sorted.windows(2) {
        let gap = pair[1].timestamp - pair[0].timestamp;
        if gap < chrono::Duration::seconds(1) {
            anomalies.push(VotingAnomaly::CoordinatedVoting {
                first: pair[0].id,
                second: pair[1].id,
                gap_ms: gap.num_milliseconds(),
            });
        }
    }

    if tally.reject_weight > 0.0 {
        let ratio = tally.approve_weight / tally.reject_weight;
        if ratio > 10.0 || ratio < 0.1 {
            anomalies.push(VotingAnomaly::ExtremeRatio { ratio });
        }
    }

    let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
    if total_weight > 0.0 {
        let mut by_voter: HashMap<Uuid, f64> = HashMap::new();
        for vote in votes {
            *by_voter.entry(vote.voter_id).or_insert(0.0) += vote.weight;
        }
        for (voter_id, weight) in by_voter {
            let share = weight / total_weight;
            if share > 0.1 {
                anomalies.push(VotingAnomaly::SingleVoterDominance { voter_id, share });
            }
        }
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Decision;

    fn vote_at(voter_id: Uuid, decision: Decision, weight: f64, offset_ms: i64) -> Vote {
        Vote {
            id: Uuid::new_v4(),
            proposal_id: Uuid::new_v4(),
            voter_id,
            decision,
            weight,
            quadratic_strength: None,
            approved_options: None,
            timestamp: chrono::Utc::now() + chrono::Duration::milliseconds(offset_ms),
        }
    }

    #[test]
    fn flags_votes_cast_within_one_second() {
        let votes = vec![vote_at(Uuid::new_v4(), Decision::Approve, 1.0, 0), vote_at(Uuid::new_v4(), Decision::Approve, 1.0, 200)];
        let tally = Tally { approve_weight: 2.0, reject_weight: 0.0, distinct_voters: 2 };
        let anomalies = detect_anomalies(&votes, &tally);
        assert!(anomalies.iter().any(|a| matches!(a, VotingAnomaly::CoordinatedVoting { .. })));
    }

    #[test]
    fn flags_extreme_ratio() {
        let votes = vec![
            vote_at(Uuid::new_v4(), Decision::Approve, 20.0, 0),
            vote_at(Uuid::new_v4(), Decision::Reject, 1.0, 5_000),
        ];
        let tally = Tally { approve_weight: 20.0, reject_weight: 1.0, distinct_voters: 2 };
        let anomalies = detect_anomalies(&votes, &tally);
        assert!(anomalies.iter().any(|a| matches!(a, VotingAnomaly::ExtremeRatio { .. })));
    }

    #[test]
    fn flags_single_voter_dominance() {
        let dominant = Uuid::new_v4();
        let votes = vec![
            vote_at(dominant, Decision::Approve, 50.0, 0),
            vote_at(Uuid::new_v4(), Decision::Approve, 1.0, 5_000),
            vote_at(Uuid::new_v4(), Decision::Approve, 1.0, 10_000),
        ];
        let tally = Tally { approve_weight: 52.0, reject_weight: 0.0, distinct_voters: 3 };
        let anomalies = detect_anomalies(&votes, &tally);
        assert!(anomalies.iter().any(|a| matches!(a, VotingAnomaly::SingleVoterDominance { voter_id, .. } if *voter_id == dominant)));
    }
}
