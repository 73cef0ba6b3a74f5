//! Observations fed to the detector and the behaviour events it emits.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One observed unit of agent activity: a consensus message or a cast vote.
/// The detector's rules pattern-match on this to decide eligibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Observation {
    /// A consensus-protocol message (PBFT phase name, or `"view-change"`).
    Message {
        /// `pre-prepare` / `prepare` / `commit` / `view-change` / `new-view`.
        kind: String,
        /// The view the message claims.
        view: u64,
        /// The sequence number the message claims.
        seq: u64,
        /// Content digest.
        digest: [u8; 32],
        /// Whether a view-change message carried a `lastCommitted` payload.
        has_last_committed: bool,
        /// Observation timestamp.
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A cast vote.
    Vote {
        /// The proposal voted on.
        proposal_id: Uuid,
        /// `approve` / `reject`, kept as a string since the detector does
        /// not depend on the voting crate's `Decision` type.
        decision: String,
        /// Vote weight.
        weight: f64,
        /// Cast timestamp.
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl Observation {
    /// The timestamp common to every observation kind.
    #[must_use]
    pub fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        match self {
            Self::Message { timestamp, .. } | Self::Vote { timestamp, .. } => *timestamp,
        }
    }
}

/// Severity bucket for a detected behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Minor anomaly.
    Low,
    /// Moderate anomaly.
    Medium,
    /// Serious anomaly.
    High,
    /// Severe, likely-malicious anomaly.
    Critical,
}

impl Severity {
    /// Multiplier applied to `basePenalty` when computing a reputation hit.
    #[must_use]
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
            Self::Critical => 5.0,
        }
    }
}

/// `{kind, agentId, severity, evidence, timestamp, confidence, description}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorEvent {
    /// Which rule triggered.
    pub kind: String,
    /// The subject agent.
    pub agent_id: Uuid,
    /// Assigned severity.
    pub severity: Severity,
    /// Supporting evidence strings (free-form, rule-specific).
    pub evidence: Vec<String>,
    /// Detection timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// How confident the rule is, in `[0, 1]`.
    pub confidence: f64,
    /// Human-readable summary.
    pub description: String,
}

/// Trust-level bucket, derived from `currentScore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustLevel {
    /// `>= 0.9`
    Verified,
    /// `>= 0.7`
    High,
    /// `>= 0.5`
    Medium,
    /// `>= 0.3`
    Low,
    /// `< 0.3`; subject to quarantine.
    Untrusted,
}

impl TrustLevel {
    /// Bucket a raw score into a trust level.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Verified
        } else if score >= 0.7 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else if score >= 0.3 {
            Self::Low
        } else {
            Self::Untrusted
        }
    }
}
