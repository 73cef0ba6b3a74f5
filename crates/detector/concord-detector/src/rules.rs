//! The six built-in malicious-behaviour rules, each evaluated over a
//! subject agent's sliding window of observations.

use crate::types::{Observation, Severity};
use std::collections::HashMap;

/// One rule's verdict: severity, confidence, description, and evidence.
pub struct Trigger {
    /// Rule identifier, used as `BehaviorEvent::kind`.
    pub kind: &'static str,
    /// Assigned severity.
    pub severity: Severity,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Human-readable summary.
    pub description: String,
    /// Supporting evidence.
    pub evidence: Vec<String>,
}

/// `double-voting`: two votes from the same voter on the same proposal.
/// `window` holds only this voter's own observations.
#[must_use]
pub fn double_voting(window: &[Observation]) -> Option<Trigger> {
    let mut seen = std::collections::HashSet::new();
    for obs in window {
        if let Observation::Vote { proposal_id, .. } = obs {
            if !seen.insert(*proposal_id) {
                return Some(Trigger {
                    kind: "double-voting",
                    severity: Severity::High,
                    confidence: 0.95,
                    description: format!("multiple votes cast on proposal {proposal_id}"),
                    evidence: vec![proposal_id.to_string()],
                });
            }
        }
    }
    None
}

/// `conflicting-messages`: two messages with the same `(kind, view, seq)`
/// but different digests.
#[must_use]
pub fn conflicting_messages(window: &[Observation]) -> Option<Trigger> {
    let mut seen: HashMap<(String, u64, u64), [u8; 32]> = HashMap::new();
    for obs in window {
        if let Observation::Message { kind, view, seq, digest, .. } = obs {
            let key = (kind.clone(), *view, *seq);
            if let Some(prior) = seen.get(&key) {
                if prior != digest {
                    return Some(Trigger {
                        kind: "conflicting-messages",
                        severity: Severity::Critical,
                        confidence: 0.99,
                        description: format!("conflicting {kind} messages for view {view} seq {seq}"),
                        evidence: vec![format!("{view}:{seq}")],
                    });
                }
            } else {
                seen.insert(key, *digest);
            }
        }
    }
    None
}

/// `timing-manipulation`: any two messages `<10ms` apart, or an inter-
/// message interval variance `<100` ms² over at least 5 messages.
#[must_use]
pub fn timing_manipulation(window: &[Observation]) -> Option<Trigger> {
    let mut timestamps: Vec<_> = window.iter().map(Observation::timestamp).collect();
    timestamps.sort();

    for pair in timestamps.windows(2) {
        let gap_ms = (pair[1] - pair[0]).num_milliseconds();
        if gap_ms < 10 {
            return Some(Trigger {
                kind: "timing-manipulation",
                severity: Severity::Medium,
                confidence: 0.8,
                description: format!("messages {gap_ms}ms apart"),
                evidence: vec![format!("gap_ms={gap_ms}")],
            });
        }
    }

    if timestamps.len() >= 5 {
        let gaps: Vec<f64> =
            timestamps.windows(2).map(|p| (p[1] - p[0]).num_milliseconds() as f64).collect();
        let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
        let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
        if variance < 100.0 {
            return Some(Trigger {
                kind: "timing-manipulation",
                severity: Severity::Medium,
                confidence: 0.7,
                description: format!("suspiciously regular message cadence, variance={variance:.2}"),
                evidence: vec![format!("variance={variance:.2}")],
            });
        }
    }
    None
}

/// `spam-flooding`: more than `max_messages_per_window` observations.
#[must_use]
pub fn spam_flooding(window: &[Observation], max_messages_per_window: usize) -> Option<Trigger> {
    if window.len() > max_messages_per_window {
        Some(Trigger {
            kind: "spam-flooding",
            severity: Severity::Medium,
            confidence: 0.9,
            description: format!("{} messages exceeds limit of {max_messages_per_window}", window.len()),
            evidence: vec![window.len().to_string()],
        })
    } else {
        None
    }
}

/// `collusion`: a single `(decision, weight)` pattern covers `>80%` of votes.
#[must_use]
pub fn collusion(window: &[Observation]) -> Option<Trigger> {
    let votes: Vec<(&str, u64)> = window
        .iter()
        .filter_map(|o| match o {
            Observation::Vote { decision, weight, .. } => Some((decision.as_str(), weight.to_bits())),
            _ => None,
        })
        .collect();
    if votes.is_empty() {
        return None;
    }
    let mut counts: HashMap<(&str, u64), usize> = HashMap::new();
    for v in &votes {
        *counts.entry(*v).or_insert(0) += 1;
    }
    let (pattern, count) = counts.into_iter().max_by_key(|(_, c)| *c)?;
    let share = count as f64 / votes.len() as f64;
    if share > 0.8 {
        Some(Trigger {
            kind: "collusion",
            severity: Severity::High,
            confidence: share,
            description: format!("{:.0}% of votes share decision {:?}", share * 100.0, pattern.0),
            evidence: vec![format!("share={share:.2}")],
        })
    } else {
        None
    }
}

/// `view-change-abuse`: more than 3 view-change messages in the window, or
/// any view-change message missing a `lastCommitted` payload.
#[must_use]
pub fn view_change_abuse(window: &[Observation]) -> Option<Trigger> {
    let view_changes: Vec<&Observation> = window
        .iter()
        .filter(|o| matches!(o, Observation::Message { kind, .. } if kind == "view-change"))
        .collect();

    if view_changes.len() > 3 {
        return Some(Trigger {
            kind: "view-change-abuse",
            severity: Severity::High,
            confidence: 0.85,
            description: format!("{} view-change messages in window", view_changes.len()),
            evidence: vec![view_changes.len().to_string()],
        });
    }

    if view_changes.iter().any(|o| matches!(o, Observation::Message { has_last_committed, .. } if !has_last_committed)) {
        return Some(Trigger {
            kind: "view-change-abuse",
            severity: Severity::Medium,
            confidence: 0.7,
            description: "view-change message missing lastCommitted payload".to_string(),
            evidence: vec!["missing-last-committed".to_string()],
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn double_voting_detects_repeat_proposal() {
        let proposal = Uuid::new_v4();
        let window = vec![
            Observation::Vote { proposal_id: proposal, decision: "approve".into(), weight: 1.0, timestamp: chrono::Utc::now() },
            Observation::Vote { proposal_id: proposal, decision: "reject".into(), weight: 1.0, timestamp: chrono::Utc::now() },
        ];
        assert!(double_voting(&window).is_some());
    }

    #[test]
    fn conflicting_messages_detects_differing_digest() {
        let window = vec![
            Observation::Message { kind: "prepare".into(), view: 1, seq: 1, digest: [1; 32], has_last_committed: true, timestamp: chrono::Utc::now() },
            Observation::Message { kind: "prepare".into(), view: 1, seq: 1, digest: [2; 32], has_last_committed: true, timestamp: chrono::Utc::now() },
        ];
        assert!(conflicting_messages(&window).is_some());
    }

    #[test]
    fn spam_flooding_trips_over_limit() {
        let window: Vec<Observation> = (0..5)
            .map(|_| Observation::Message { kind: "prepare".into(), view: 1, seq: 1, digest: [0; 32], has_last_committed: true, timestamp: chrono::Utc::now() })
            .collect();
        assert!(spam_flooding(&window, 3).is_some());
        assert!(spam_flooding(&window, 10).is_none());
    }

    #[test]
    fn view_change_abuse_flags_missing_payload() {
        let window = vec![Observation::Message {
            kind: "view-change".into(),
            view: 1,
            seq: 0,
            digest: [0; 32],
            has_last_committed: false,
            timestamp: chrono::Utc::now(),
        }];
        assert!(view_change_abuse(&window).is_some());
    }
}
