//! The detector engine: ingests observations, runs the rule set, records
//! behaviour events, and drives the reputation ledger.

use crate::error::DetectorError;
use crate::reputation::{ReputationLedger, ReputationRecord};
use crate::rules::{self, Trigger};
use crate::types::{BehaviorEvent, Observation};
use crate::window::{ObservationWindow, DEFAULT_WINDOW_SECS};
use async_trait::async_trait;
use concord_core::{
    ConcordEvent, ConcordResult, EventBus, HealthLevel, HealthStatus, Observable, ObservableState,
    ObservableStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Which built-in rules are active. All enabled by default.
#[derive(Debug, Clone, Copy)]
pub struct RuleConfig {
    /// Enable `double-voting`.
    pub double_voting: bool,
    /// Enable `conflicting-messages`.
    pub conflicting_messages: bool,
    /// Enable `timing-manipulation`.
    pub timing_manipulation: bool,
    /// Enable `spam-flooding`.
    pub spam_flooding: bool,
    /// Enable `collusion`.
    pub collusion: bool,
    /// Enable `view-change-abuse`.
    pub view_change_abuse: bool,
    /// Messages per window before `spam-flooding` trips.
    pub max_messages_per_window: usize,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            double_voting: true,
            conflicting_messages: true,
            timing_manipulation: true,
            spam_flooding: true,
            collusion: true,
            view_change_abuse: true,
            max_messages_per_window: 100,
        }
    }
}

/// Ties the observation window, rule set, and reputation ledger together.
pub struct Detector {
    events: Arc<EventBus>,
    config: RuleConfig,
    window: ObservationWindow,
    ledger: ReputationLedger,
}

impl Detector {
    /// Construct a detector with the default 5-minute window and rule set.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self::with_config(events, RuleConfig::default(), DEFAULT_WINDOW_SECS)
    }

    /// Construct a detector with explicit rule configuration and window span.
    #[must_use]
    pub fn with_config(events: Arc<EventBus>, config: RuleConfig, window_secs: i64) -> Self {
        Self { events, config, window: ObservationWindow::new(window_secs), ledger: ReputationLedger::new() }
    }

    /// Ingest one observation from `agent_id`, running every enabled rule
    /// over its updated window and recording any triggers.
    pub fn observe(&self, agent_id: Uuid, observation: Observation) -> Vec<BehaviorEvent> {
        self.ledger.record_interaction(agent_id);
        let window = self.window.record(agent_id, observation);

        let mut triggers: Vec<Trigger> = Vec::new();
        if self.config.double_voting {
            triggers.extend(rules::double_voting(&window));
        }
        if self.config.conflicting_messages {
            triggers.extend(rules::conflicting_messages(&window));
        }
        if self.config.timing_manipulation {
            triggers.extend(rules::timing_manipulation(&window));
        }
        if self.config.spam_flooding {
            triggers.extend(rules::spam_flooding(&window, self.config.max_messages_per_window));
        }
        if self.config.collusion {
            triggers.extend(rules::collusion(&window));
        }
        if self.config.view_change_abuse {
            triggers.extend(rules::view_change_abuse(&window));
        }

        let mut events = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            let event = BehaviorEvent {
                kind: trigger.kind.to_string(),
                agent_id,
                severity: trigger.severity,
                evidence: trigger.evidence,
                timestamp: chrono::Utc::now(),
                confidence: trigger.confidence,
                description: trigger.description,
            };
            self.record(event.clone());
            events.push(event);
        }
        events
    }

    fn record(&self, event: BehaviorEvent) {
        warn!(agent_id = %event.agent_id, kind = %event.kind, "malicious behaviour detected");
        self.events.publish(ConcordEvent::MaliciousBehaviorDetected {
            agent_id: event.agent_id,
            kind: event.kind.clone(),
            severity: format!("{:?}", event.severity),
        });

        let was_quarantined = self.ledger.get(event.agent_id).is_some_and(|r| r.quarantined);
        let agent_id = event.agent_id;
        let record = self.ledger.apply_penalty(event);
        if record.quarantined && !was_quarantined {
            self.window.clear(agent_id);
            self.events.publish(ConcordEvent::AgentQuarantined { agent_id });
        }
    }

    /// Current reputation record for `agent_id`, if known.
    #[must_use]
    pub fn reputation(&self, agent_id: Uuid) -> Option<ReputationRecord> {
        self.ledger.get(agent_id)
    }

    /// Every currently quarantined agent.
    #[must_use]
    pub fn quarantined_agents(&self) -> Vec<Uuid> {
        self.ledger.quarantined_agents()
    }

    /// Explicitly rehabilitate a quarantined agent.
    pub fn rehabilitate(&self, agent_id: Uuid) -> Result<ReputationRecord, DetectorError> {
        let record = self.ledger.rehabilitate(agent_id)?;
        info!(%agent_id, "agent rehabilitated");
        Ok(record)
    }
}

#[async_trait]
impl Observable for Detector {
    async fn status(&self) -> ConcordResult<ObservableStatus> {
        Ok(ObservableStatus {
            state: ObservableState::Running,
            last_updated: chrono::Utc::now(),
            metadata: HashMap::new(),
        })
    }

    async fn health(&self) -> ConcordResult<HealthStatus> {
        let overall = if self.quarantined_agents().is_empty() { HealthLevel::Healthy } else { HealthLevel::Warning };
        Ok(HealthStatus { overall, checks: HashMap::new(), last_check: chrono::Utc::now() })
    }

    async fn metrics(&self) -> ConcordResult<HashMap<String, f64>> {
        let mut metrics = HashMap::new();
        metrics.insert("quarantined_agents".to_string(), self.quarantined_agents().len() as f64);
        Ok(metrics)
    }

    fn describe(&self) -> String {
        format!("Detector(quarantined={})", self.quarantined_agents().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    #[test]
    fn double_vote_produces_behavior_event_and_penalty() {
        let detector = Detector::new(Arc::new(EventBus::default()));
        let agent = Uuid::new_v4();
        let proposal = Uuid::new_v4();

        let events = detector.observe(
            agent,
            Observation::Vote { proposal_id: proposal, decision: "approve".into(), weight: 1.0, timestamp: chrono::Utc::now() },
        );
        assert!(events.is_empty());

        let events = detector.observe(
            agent,
            Observation::Vote { proposal_id: proposal, decision: "reject".into(), weight: 1.0, timestamp: chrono::Utc::now() },
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "double-voting");

        let record = detector.reputation(agent).unwrap();
        assert!(record.current_score < 1.0);
    }

    #[test]
    fn severe_penalty_quarantines_and_clears_window() {
        let detector = Detector::new(Arc::new(EventBus::default()));
        let agent = Uuid::new_v4();
        for _ in 0..4 {
            let events = detector.observe(
                agent,
                Observation::Message {
                    kind: "prepare".into(),
                    view: 1,
                    seq: 1,
                    digest: [1; 32],
                    has_last_committed: true,
                    timestamp: chrono::Utc::now(),
                },
            );
            let _ = events;
            detector.observe(
                agent,
                Observation::Message {
                    kind: "prepare".into(),
                    view: 1,
                    seq: 1,
                    digest: [2; 32],
                    has_last_committed: true,
                    timestamp: chrono::Utc::now(),
                },
            );
        }
        assert!(detector.quarantined_agents().contains(&agent));
    }

    #[test]
    fn rehabilitation_round_trips_through_detector() {
        let detector = Detector::new(Arc::new(EventBus::default()));
        let agent = Uuid::new_v4();
        detector.record(BehaviorEvent {
            kind: "conflicting-messages".into(),
            agent_id: agent,
            severity: Severity::Critical,
            evidence: vec![],
            timestamp: chrono::Utc::now(),
            confidence: 1.0,
            description: "test".into(),
        });
        detector.record(BehaviorEvent {
            kind: "conflicting-messages".into(),
            agent_id: agent,
            severity: Severity::Critical,
            evidence: vec![],
            timestamp: chrono::Utc::now(),
            confidence: 1.0,
            description: "test".into(),
        });
        assert!(detector.quarantined_agents().contains(&agent));
        detector.rehabilitate(agent).unwrap();
        assert!(!detector.quarantined_agents().contains(&agent));
    }
}
