//! PBFT view-change: replacing a suspected leader.

pub mod policies;

use crate::traits::LeaderElection;
use crate::types::{AgentId, ViewNumber};
use async_trait::async_trait;
use concord_core::{ConcordEvent, ConcordResult, EventBus};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Why a view change was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewChangeReason {
    /// The leader's heartbeat was not seen within `electionTimeout`.
    LeaderTimeout,
    /// A node explicitly requested a view change (e.g. on detecting a
    /// conflicting pre-prepare).
    Explicit,
    /// A commit-phase timeout occurred without reaching quorum.
    CommitTimeout,
}

/// `view-change(v, lastStableCheckpoint, checkpointProof, preparedSet)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewChangeMessage {
    /// The view this node wants to move to.
    pub view: ViewNumber,
    /// The sender.
    pub sender: AgentId,
    /// Reason for the request.
    pub reason: ViewChangeReason,
    /// Last checkpoint this node considers stable.
    pub last_stable_checkpoint: u64,
    /// `(seq, digest)` pairs this node prepared but did not commit in the
    /// old view; the new leader reconstructs pre-prepares for these.
    pub prepared_set: Vec<(u64, [u8; 32])>,
}

/// `new-view(v, viewChanges, reconstructedPrePrepares)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewViewMessage {
    /// The view being entered.
    pub view: ViewNumber,
    /// The sender (must be `leader(view)`).
    pub sender: AgentId,
    /// The `>= 2f+1` view-change messages the new leader collected.
    pub view_changes: Vec<ViewChangeMessage>,
    /// Reconstructed `(seq, digest)` pre-prepares for proposals that were
    /// prepared-but-not-committed in the old view.
    pub reconstructed_pre_prepares: Vec<(u64, [u8; 32])>,
}

/// Transport for the two view-change message kinds.
#[async_trait]
pub trait ViewChangeTransport: Send + Sync {
    /// Broadcast a view-change request.
    async fn broadcast_view_change(&self, message: ViewChangeMessage) -> ConcordResult<()>;

    /// Broadcast a new-view announcement.
    async fn broadcast_new_view(&self, message: NewViewMessage) -> ConcordResult<()>;
}

/// Coordinates the view-change protocol for one node: broadcasting its own
/// view-change requests, collecting others', and assembling and
/// broadcasting the new-view if this node is elected leader of the target
/// view.
pub struct ViewChangeCoordinator<T> {
    node_id: AgentId,
    policy: Arc<dyn LeaderElection>,
    transport: Arc<T>,
    events: Arc<EventBus>,
    collected: DashMap<ViewNumber, DashSet<AgentId>>,
    messages: DashMap<(ViewNumber, AgentId), ViewChangeMessage>,
}

impl<T> ViewChangeCoordinator<T>
where
    T: ViewChangeTransport,
{
    /// Construct a coordinator using the given leader-election policy.
    pub fn new(node_id: AgentId, policy: Arc<dyn LeaderElection>, transport: Arc<T>, events: Arc<EventBus>) -> Self {
        Self { node_id, policy, transport, events, collected: DashMap::new(), messages: DashMap::new() }
    }

    /// Broadcast a view-change request for `view` and record it as our own
    /// vote toward that view.
    pub async fn initiate_view_change(
        &self,
        view: ViewNumber,
        reason: ViewChangeReason,
        last_stable_checkpoint: u64,
        prepared_set: Vec<(u64, [u8; 32])>,
    ) -> ConcordResult<()> {
        let message = ViewChangeMessage { view, sender: self.node_id, reason, last_stable_checkpoint, prepared_set };
        self.record(message.clone());
        self.transport.broadcast_view_change(message).await
    }

    fn record(&self, message: ViewChangeMessage) {
        self.collected.entry(message.view).or_default().insert(message.sender);
        self.messages.insert((message.view, message.sender), message);
    }

    /// Handle an inbound view-change message. If this brings the collected
    /// set for `view` to `>= quorum` and this node is the elected leader of
    /// `view`, broadcasts the new-view message and returns the new leader.
    pub async fn handle_view_change(
        &self,
        message: ViewChangeMessage,
        active_agents: &[AgentId],
        quorum: usize,
    ) -> ConcordResult<Option<AgentId>> {
        let view = message.view;
        self.record(message);

        let collected_count = self.collected.get(&view).map(|s| s.len()).unwrap_or(0);
        if collected_count < quorum {
            return Ok(None);
        }

        let leader = self.policy.select_leader(view.0, active_agents);
        if leader != self.node_id {
            return Ok(None);
        }

        let view_changes: Vec<ViewChangeMessage> = self
            .messages
            .iter()
            .filter(|entry| entry.key().0 == view)
            .map(|entry| entry.value().clone())
            .collect();

        let reconstructed_pre_prepares = Self::reconstruct_prepared_proposals(&view_changes);

        let new_view_message = NewViewMessage {
            view,
            sender: self.node_id,
            view_changes,
            reconstructed_pre_prepares,
        };
        self.transport.broadcast_new_view(new_view_message).await?;
        info!(?view, leader = %leader, "view change complete, new leader announced");
        self.events.publish(ConcordEvent::ViewChanged { new_view: view.0, new_leader: leader.0 });
        self.events.publish(ConcordEvent::LeaderElected { leader: leader.0, term_or_view: view.0 });
        Ok(Some(leader))
    }

    /// Accept a new-view announcement: valid iff the sender is the computed
    /// leader for `view` and the bundled set has `>= quorum` valid entries.
    #[must_use]
    pub fn accept_new_view(&self, message: &NewViewMessage, active_agents: &[AgentId], quorum: usize) -> bool {
        let expected_leader = self.policy.select_leader(message.view.0, active_agents);
        message.sender == expected_leader
            && message.view_changes.iter().all(|vc| vc.view == message.view)
            && message.view_changes.len() >= quorum
    }

    /// Union of every `(seq, digest)` pair that was prepared-but-not-
    /// committed across the collected view-change set; any proposal not
    /// present in at least one view-change's prepared set may be dropped.
    fn reconstruct_prepared_proposals(view_changes: &[ViewChangeMessage]) -> Vec<(u64, [u8; 32])> {
        let mut seen = std::collections::BTreeMap::new();
        for vc in view_changes {
            for (seq, digest) in &vc.prepared_set {
                seen.entry(*seq).or_insert(*digest);
            }
        }
        seen.into_iter().collect()
    }
}
