//! Shared types for agent-to-agent security: identities, capabilities,
//! sessions, and secure messages.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Trust bucket used by the capability matrix. Distinct from the
/// detector's reputation-derived [`TrustLevel`](concord_core) buckets:
/// this one gates *what an agent may do*, not how suspicious it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecurityTrustLevel {
    /// No capabilities granted.
    Untrusted,
    /// `{read, status}`.
    Basic,
    /// `Basic` plus `{execute, query}`.
    Verified,
    /// `Verified` plus `{admin, configure}`.
    Trusted,
}

/// A single granted action. The capability matrix maps
/// [`SecurityTrustLevel`] to the set of capabilities it unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Read access.
    Read,
    /// Status queries.
    Status,
    /// Execute state operations.
    Execute,
    /// Query consensus/voting state.
    Query,
    /// Administrative actions.
    Admin,
    /// Change running configuration.
    Configure,
}

impl SecurityTrustLevel {
    /// The capability set this trust level unlocks.
    #[must_use]
    pub fn capabilities(self) -> HashSet<Capability> {
        use Capability::{Admin, Configure, Execute, Query, Read, Status};
        match self {
            Self::Untrusted => HashSet::new(),
            Self::Basic => [Read, Status].into_iter().collect(),
            Self::Verified => [Read, Status, Execute, Query].into_iter().collect(),
            Self::Trusted => [Read, Status, Execute, Query, Admin, Configure].into_iter().collect(),
        }
    }

    /// Whether this level permits every capability in `requested`.
    #[must_use]
    pub fn permits(self, requested: &HashSet<Capability>) -> bool {
        requested.is_subset(&self.capabilities())
    }

    /// Step down one level, used by continuous verification on a low
    /// behaviour score. `Untrusted` stays put.
    #[must_use]
    pub fn step_down(self) -> Self {
        match self {
            Self::Trusted => Self::Verified,
            Self::Verified => Self::Basic,
            Self::Basic | Self::Untrusted => Self::Untrusted,
        }
    }
}

/// A self-issued or third-party certificate binding a public key to an
/// agent id, with a validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Subject agent.
    pub agent_id: Uuid,
    /// Ed25519 public key bytes the subject signs with.
    pub public_key: [u8; 32],
    /// Not valid before.
    pub issued_at: chrono::DateTime<chrono::Utc>,
    /// Not valid after.
    pub expires_at: chrono::DateTime<chrono::Utc>,
    /// Issuer's signature over `(agent_id, public_key, issued_at, expires_at)`.
    pub signature: Vec<u8>,
}

/// A registered agent's identity record.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    /// Agent id.
    pub id: Uuid,
    /// Current certificate.
    pub certificate: Certificate,
    /// Current trust level.
    pub trust_level: SecurityTrustLevel,
    /// Latest externally supplied behaviour score, `[0, 1]`.
    pub behavior_score: f64,
    /// Registered at.
    pub registered_at: chrono::DateTime<chrono::Utc>,
    /// Whether this identity has been revoked.
    pub revoked: bool,
}

/// An established secure session between two agents.
#[derive(Clone)]
pub struct Session {
    /// Session id.
    pub id: Uuid,
    /// The agent this session was established for.
    pub agent_id: Uuid,
    /// Capabilities this session was granted.
    pub capabilities: HashSet<Capability>,
    /// Derived AEAD key.
    pub encryption_key: [u8; 32],
    /// Derived MAC key (kept for parity with the HKDF two-key derivation
    /// even though AES-GCM's tag already authenticates the ciphertext).
    pub mac_key: [u8; 32],
    /// Established at.
    pub established_at: chrono::DateTime<chrono::Utc>,
}

/// A signed, optionally encrypted message exchanged between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureMessage {
    /// Message id.
    pub id: Uuid,
    /// Sender.
    pub from: Uuid,
    /// Recipient.
    pub to: Uuid,
    /// Application-defined message kind.
    pub kind: String,
    /// Payload, encrypted under the session key when a session is used.
    pub payload: Vec<u8>,
    /// Send timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Anti-replay nonce.
    pub nonce: [u8; 16],
    /// Strictly increasing per-session counter; `0` outside a session.
    pub sequence_number: u64,
    /// Signature over `{id, from, to, kind, payload, timestamp, nonce,
    /// sequence_number}`.
    pub signature: Vec<u8>,
}

/// Per-message anomaly flagged during receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageAnomaly {
    /// Payload exceeded the 1MB cap.
    Oversized,
    /// Sender attempted an action beyond its granted capabilities.
    ExcessiveCapabilities,
}

/// Result of [`crate::message::receive_secure_message`].
#[derive(Debug, Clone)]
pub struct ReceiveOutcome {
    /// Whether the message passed every check.
    pub valid: bool,
    /// Decrypted payload, present only when `valid`.
    pub payload: Option<Vec<u8>>,
    /// Anomalies observed regardless of validity.
    pub anomalies: Vec<MessageAnomaly>,
    /// Sender's trust score at receipt time.
    pub trust_score: f64,
}
