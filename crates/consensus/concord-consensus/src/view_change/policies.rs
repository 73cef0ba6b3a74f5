//! The five pluggable leader-selection policies.

use crate::traits::{CandidateMetrics, LeaderElection};
use crate::types::AgentId;
use dashmap::DashMap;

/// `candidates[view mod n]`.
#[derive(Debug, Default)]
pub struct RoundRobinElection;

impl LeaderElection for RoundRobinElection {
    fn select_leader(&self, view: u64, candidates: &[AgentId]) -> AgentId {
        candidates[(view as usize) % candidates.len()]
    }

    fn update_candidate_metrics(&self, _candidate: AgentId, _metrics: CandidateMetrics) {}
}

/// A metrics-backed policy shared by the reputation/stake/performance/hybrid
/// variants below, each differing only in the scoring function applied.
#[derive(Debug, Default)]
pub struct MetricsStore {
    metrics: DashMap<AgentId, CandidateMetrics>,
}

impl MetricsStore {
    fn get(&self, candidate: AgentId) -> CandidateMetrics {
        self.metrics.get(&candidate).map(|m| *m).unwrap_or_default()
    }

    fn record(&self, candidate: AgentId, metrics: CandidateMetrics) {
        self.metrics.insert(candidate, metrics);
    }

    fn pick_best(&self, candidates: &[AgentId], score: impl Fn(&CandidateMetrics) -> f64) -> AgentId {
        candidates
            .iter()
            .copied()
            .max_by(|a, b| {
                let sa = score(&self.get(*a));
                let sb = score(&self.get(*b));
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("candidates is non-empty")
    }
}

/// Selects the candidate with the highest recorded reputation.
#[derive(Debug, Default)]
pub struct ReputationElection {
    store: MetricsStore,
}

impl LeaderElection for ReputationElection {
    fn select_leader(&self, _view: u64, candidates: &[AgentId]) -> AgentId {
        self.store.pick_best(candidates, |m| m.reputation)
    }

    fn update_candidate_metrics(&self, candidate: AgentId, metrics: CandidateMetrics) {
        self.store.record(candidate, metrics);
    }
}

/// Selects the candidate with the highest recorded stake.
#[derive(Debug, Default)]
pub struct StakeWeightedElection {
    store: MetricsStore,
}

impl LeaderElection for StakeWeightedElection {
    fn select_leader(&self, _view: u64, candidates: &[AgentId]) -> AgentId {
        self.store.pick_best(candidates, |m| m.stake)
    }

    fn update_candidate_metrics(&self, candidate: AgentId, metrics: CandidateMetrics) {
        self.store.record(candidate, metrics);
    }
}

/// Selects the candidate with the highest recorded performance.
#[derive(Debug, Default)]
pub struct PerformanceElection {
    store: MetricsStore,
}

impl LeaderElection for PerformanceElection {
    fn select_leader(&self, _view: u64, candidates: &[AgentId]) -> AgentId {
        self.store.pick_best(candidates, |m| m.performance)
    }

    fn update_candidate_metrics(&self, candidate: AgentId, metrics: CandidateMetrics) {
        self.store.record(candidate, metrics);
    }
}

/// `0.3*rep + 0.25*avail + 0.25*perf + 0.2*stake`, halved once a candidate's
/// consecutive terms reach `max_consecutive_terms` (anti-entrenchment).
#[derive(Debug)]
pub struct HybridElection {
    store: MetricsStore,
    max_consecutive_terms: u32,
}

impl HybridElection {
    /// Construct a hybrid policy with the given consecutive-term cap.
    #[must_use]
    pub fn new(max_consecutive_terms: u32) -> Self {
        Self { store: MetricsStore::default(), max_consecutive_terms }
    }

    fn score(&self, metrics: &CandidateMetrics) -> f64 {
        let base = 0.3 * metrics.reputation + 0.25 * metrics.availability + 0.25 * metrics.performance
            + 0.2 * metrics.stake;
        if metrics.consecutive_terms >= self.max_consecutive_terms {
            base * 0.5
        } else {
            base
        }
    }
}

impl Default for HybridElection {
    fn default() -> Self {
        Self::new(3)
    }
}

impl LeaderElection for HybridElection {
    fn select_leader(&self, _view: u64, candidates: &[AgentId]) -> AgentId {
        self.store.pick_best(candidates, |m| self.score(m))
    }

    fn update_candidate_metrics(&self, candidate: AgentId, metrics: CandidateMetrics) {
        self.store.record(candidate, metrics);
    }
}
