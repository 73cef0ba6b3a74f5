//! Per-agent sliding observation window, bounded by age rather than count.

use crate::types::Observation;
use chrono::Duration;
use dashmap::DashMap;
use std::collections::VecDeque;
use uuid::Uuid;

/// Default window: 5 minutes, matching the detector's default configuration.
pub const DEFAULT_WINDOW_SECS: i64 = 300;

/// Tracks recent observations per subject agent, evicting anything older
/// than `window`.
pub struct ObservationWindow {
    window: Duration,
    by_agent: DashMap<Uuid, VecDeque<Observation>>,
}

impl ObservationWindow {
    /// Construct a window tracker with the given retention span.
    #[must_use]
    pub fn new(window_secs: i64) -> Self {
        Self { window: Duration::seconds(window_secs), by_agent: DashMap::new() }
    }

    /// Record `observation` for `agent_id`, evicting anything that has
    /// aged out, and return a snapshot of the agent's current window.
    pub fn record(&self, agent_id: Uuid, observation: Observation) -> Vec<Observation> {
        let mut entry = self.by_agent.entry(agent_id).or_default();
        entry.push_back(observation);
        let cutoff = chrono::Utc::now() - self.window;
        while entry.front().is_some_and(|o| o.timestamp() < cutoff) {
            entry.pop_front();
        }
        entry.iter().cloned().collect()
    }

    /// Current window contents for `agent_id`, without recording anything new.
    #[must_use]
    pub fn snapshot(&self, agent_id: Uuid) -> Vec<Observation> {
        self.by_agent.get(&agent_id).map(|e| e.iter().cloned().collect()).unwrap_or_default()
    }

    /// Drop all tracked state for `agent_id`.
    pub fn clear(&self, agent_id: Uuid) {
        self.by_agent.remove(&agent_id);
    }
}

impl Default for ObservationWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_within_window() {
        let window = ObservationWindow::default();
        let agent = Uuid::new_v4();
        let obs = Observation::Vote {
            proposal_id: Uuid::new_v4(),
            decision: "approve".into(),
            weight: 1.0,
            timestamp: chrono::Utc::now(),
        };
        let snapshot = window.record(agent, obs.clone());
        assert_eq!(snapshot.len(), 1);
        let snapshot = window.record(agent, obs);
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn clear_drops_agent_state() {
        let window = ObservationWindow::default();
        let agent = Uuid::new_v4();
        window.record(
            agent,
            Observation::Vote { proposal_id: Uuid::new_v4(), decision: "approve".into(), weight: 1.0, timestamp: chrono::Utc::now() },
        );
        window.clear(agent);
        assert!(window.snapshot(agent).is_empty());
    }
}
