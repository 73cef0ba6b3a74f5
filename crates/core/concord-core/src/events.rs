//! Typed pub/sub replacing the upstream source's in-process event emitter.
//!
//! Components publish [`ConcordEvent`]s after releasing any lock guards they
//! hold; consumers subscribe with [`EventBus::subscribe`] and receive events
//! on an independent `tokio::sync::broadcast` receiver.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Every event the core emits, discriminated by tag for exhaustive matching
/// by consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ConcordEvent {
    /// A new agent completed registration.
    AgentRegistered { agent_id: Uuid },
    /// A session was established between two agents.
    SessionEstablished { session_id: Uuid, agent_id: Uuid },
    /// A message was sent.
    MessageSent { message_id: Uuid, from: Uuid },
    /// A message was received and validated.
    MessageReceived { message_id: Uuid, from: Uuid },
    /// Consensus committed a proposal.
    ConsensusReached { proposal_id: Uuid, seq: u64 },
    /// A PBFT view change completed.
    ViewChanged { new_view: u64, new_leader: Uuid },
    /// A new leader was elected (PBFT view-change or Raft election).
    LeaderElected { leader: Uuid, term_or_view: u64 },
    /// The detector flagged malicious behaviour.
    MaliciousBehaviorDetected { agent_id: Uuid, kind: String, severity: String },
    /// An agent's reputation fell below the quarantine threshold.
    AgentQuarantined { agent_id: Uuid },
    /// A state-machine snapshot was taken.
    SnapshotCreated { snapshot_id: Uuid, seq: u64 },
    /// Root signing keys were rotated.
    KeysRotated { rotated_at: chrono::DateTime<chrono::Utc> },
    /// An unrecoverable fault forced an emergency shutdown.
    EmergencyShutdown { reason: String },
    /// A threat was detected (signature failure, replay, protocol violation).
    Threat { agent_id: Option<Uuid>, reason: String },
    /// An authentication-relevant event (failures or capability denials).
    Authentication { agent_id: Option<Uuid>, reason: String },
}

/// A broadcast bus for [`ConcordEvent`]s shared by every component wired
/// together by the integration façade.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConcordEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity (slow consumers lag
    /// rather than blocking producers).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of active subscribers that
    /// received it; errors only if there are none.
    pub fn publish(&self, event: ConcordEvent) {
        // A publish with no subscribers is not an error: nothing is
        // listening yet, which is normal during startup.
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ConcordEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
