//! Per-agent reputation tracking: score, trust bucket, behaviour history,
//! and quarantine state.

use crate::error::DetectorError;
use crate::types::{BehaviorEvent, Severity, TrustLevel};
use dashmap::DashMap;
use uuid::Uuid;

/// Starting score for a newly observed agent.
pub const INITIAL_SCORE: f64 = 1.0;

/// Base penalty applied before the severity multiplier.
pub const BASE_PENALTY: f64 = 0.1;

/// Explicit rehabilitation credit.
pub const REHABILITATION_CREDIT: f64 = 0.2;

/// Score below which an agent is quarantined.
pub const QUARANTINE_THRESHOLD: f64 = 0.3;

/// `{agentId, currentScore, history, trustLevel, behaviourFlags, interactions}`.
#[derive(Debug, Clone)]
pub struct ReputationRecord {
    /// Subject agent.
    pub agent_id: Uuid,
    /// Current trust score in `[0, 1]`.
    pub current_score: f64,
    /// Past behaviour events for this agent, oldest first.
    pub history: Vec<BehaviorEvent>,
    /// Derived from `current_score`.
    pub trust_level: TrustLevel,
    /// Distinct rule kinds this agent has triggered.
    pub behavior_flags: Vec<String>,
    /// Total observations processed for this agent.
    pub interactions: u64,
    /// Whether the agent is currently quarantined.
    pub quarantined: bool,
}

impl ReputationRecord {
    fn new(agent_id: Uuid) -> Self {
        Self {
            agent_id,
            current_score: INITIAL_SCORE,
            history: Vec::new(),
            trust_level: TrustLevel::from_score(INITIAL_SCORE),
            behavior_flags: Vec::new(),
            interactions: 0,
            quarantined: false,
        }
    }
}

/// Owns every agent's `ReputationRecord`.
#[derive(Default)]
pub struct ReputationLedger {
    records: DashMap<Uuid, ReputationRecord>,
}

impl ReputationLedger {
    /// Construct an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (creating if absent) the record for `agent_id`.
    pub fn record_interaction(&self, agent_id: Uuid) {
        self.records.entry(agent_id).or_insert_with(|| ReputationRecord::new(agent_id)).interactions += 1;
    }

    /// Apply `event`'s penalty: `basePenalty * confidence * severityMultiplier`,
    /// clamped to `[0, 1]`. Quarantines the agent if the score drops below
    /// [`QUARANTINE_THRESHOLD`].
    pub fn apply_penalty(&self, event: BehaviorEvent) -> ReputationRecord {
        let mut record =
            self.records.entry(event.agent_id).or_insert_with(|| ReputationRecord::new(event.agent_id));
        let penalty = BASE_PENALTY * event.confidence * event.severity.multiplier();
        record.current_score = (record.current_score - penalty).clamp(0.0, 1.0);
        record.trust_level = TrustLevel::from_score(record.current_score);
        if !record.behavior_flags.contains(&event.kind) {
            record.behavior_flags.push(event.kind.clone());
        }
        record.history.push(event);
        if record.current_score < QUARANTINE_THRESHOLD {
            record.quarantined = true;
        }
        record.clone()
    }

    /// Explicit rehabilitation: raise the score by [`REHABILITATION_CREDIT`]
    /// and lift quarantine if the score clears the threshold.
    pub fn rehabilitate(&self, agent_id: Uuid) -> Result<ReputationRecord, DetectorError> {
        let mut record = self.records.get_mut(&agent_id).ok_or(DetectorError::UnknownAgent(agent_id))?;
        if !record.quarantined {
            return Err(DetectorError::NotQuarantined(agent_id));
        }
        record.current_score = (record.current_score + REHABILITATION_CREDIT).clamp(0.0, 1.0);
        record.trust_level = TrustLevel::from_score(record.current_score);
        if record.current_score >= QUARANTINE_THRESHOLD {
            record.quarantined = false;
        }
        Ok(record.clone())
    }

    /// Current record for `agent_id`, if any.
    #[must_use]
    pub fn get(&self, agent_id: Uuid) -> Option<ReputationRecord> {
        self.records.get(&agent_id).map(|r| r.clone())
    }

    /// All currently quarantined agents.
    #[must_use]
    pub fn quarantined_agents(&self) -> Vec<Uuid> {
        self.records.iter().filter(|r| r.quarantined).map(|r| r.agent_id).collect()
    }
}
