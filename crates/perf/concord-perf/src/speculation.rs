//! Speculative execution: high-confidence proposals are executed ahead of
//! commit, but never exposed to readers until the real commit resolves them.

use crate::error::PerfError;
use crate::types::{Speculation, SpeculationOutcome};
use dashmap::DashMap;
use uuid::Uuid;

/// Tracks in-flight speculations, keyed by proposal id. Resolved entries
/// are removed; nothing here is readable from outside this module.
#[derive(Default)]
pub struct SpeculationTracker {
    inflight: DashMap<Uuid, Speculation>,
}

impl SpeculationTracker {
    /// Construct an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a speculative execution if `confidence` clears `threshold`.
    /// Returns whether the speculation was accepted.
    pub fn speculate(&self, speculation: Speculation, threshold: f64) -> bool {
        if speculation.confidence > threshold {
            self.inflight.insert(speculation.proposal_id, speculation);
            true
        } else {
            false
        }
    }

    /// Resolve a speculation against the real commit result. Matching
    /// results commit the speculative work; mismatches roll it back.
    pub fn resolve(&self, proposal_id: Uuid, committed_result: &[u8]) -> Result<SpeculationOutcome, PerfError> {
        let (_, speculation) = self.inflight.remove(&proposal_id).ok_or(PerfError::NoSpeculation(proposal_id))?;
        if speculation.result == committed_result {
            Ok(SpeculationOutcome::Committed)
        } else {
            Ok(SpeculationOutcome::RolledBack)
        }
    }

    /// Whether a speculation is currently in flight for `proposal_id`.
    #[must_use]
    pub fn is_speculating(&self, proposal_id: Uuid) -> bool {
        self.inflight.contains_key(&proposal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_speculation_is_rejected() {
        let tracker = SpeculationTracker::new();
        let speculation = Speculation { proposal_id: Uuid::new_v4(), confidence: 0.5, result: vec![1] };
        assert!(!tracker.speculate(speculation, 0.8));
    }

    #[test]
    fn matching_result_commits_speculation() {
        let tracker = SpeculationTracker::new();
        let id = Uuid::new_v4();
        let speculation = Speculation { proposal_id: id, confidence: 0.9, result: vec![1, 2, 3] };
        assert!(tracker.speculate(speculation, 0.8));
        assert_eq!(tracker.resolve(id, &[1, 2, 3]).unwrap(), SpeculationOutcome::Committed);
        assert!(!tracker.is_speculating(id));
    }

    #[test]
    fn mismatched_result_rolls_back() {
        let tracker = SpeculationTracker::new();
        let id = Uuid::new_v4();
        let speculation = Speculation { proposal_id: id, confidence: 0.9, result: vec![1, 2, 3] };
        tracker.speculate(speculation, 0.8);
        assert_eq!(tracker.resolve(id, &[9, 9, 9]).unwrap(), SpeculationOutcome::RolledBack);
    }

    #[test]
    fn resolving_unknown_proposal_errors() {
        let tracker = SpeculationTracker::new();
        assert!(tracker.resolve(Uuid::new_v4(), &[]).is_err());
    }
}
