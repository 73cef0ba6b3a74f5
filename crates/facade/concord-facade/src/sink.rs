//! Bridges committed consensus proposals into the state machine, and gives
//! the state machine a no-op replicator since no real peer network exists
//! in this workspace.

use async_trait::async_trait;
use concord_consensus::traits::ProposalSink;
use concord_consensus::types::Proposal as ConsensusProposal;
use concord_core::ConcordResult;
use concord_state::{StateMachine, StateOperation};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A [`concord_state::traits::Replicator`] that only logs; standing in for
/// a real peer transport, which is out of scope for this workspace.
#[derive(Default)]
pub struct NoopReplicator;

#[async_trait]
impl concord_state::traits::Replicator for NoopReplicator {
    async fn replicate(&self, replica: Uuid, op: &StateOperation) -> ConcordResult<()> {
        debug!(%replica, op_id = %op.id, "no-op replication (no peer transport configured)");
        Ok(())
    }
}

/// Decodes a committed proposal's content as a [`StateOperation`] and
/// applies it, the callback the consensus engine invokes once a proposal
/// reaches quorum.
pub struct StateSink<R> {
    state: Arc<StateMachine<R>>,
}

impl<R> StateSink<R> {
    /// Wrap a state machine as a consensus proposal sink.
    #[must_use]
    pub fn new(state: Arc<StateMachine<R>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl<R> ProposalSink for StateSink<R>
where
    R: concord_state::traits::Replicator,
{
    async fn apply_committed(&self, proposal: &ConsensusProposal, seq: u64) -> ConcordResult<()> {
        let mut op: StateOperation = serde_json::from_slice(&proposal.content)
            .map_err(|e| concord_core::ConcordError::validation(format!("committed proposal {} did not decode as a state operation: {e}", proposal.id)))?;
        op.seq = seq;
        self.state.apply(op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_consensus::types::AgentId;
    use concord_core::{ClusterConfig, EventBus};
    use concord_state::OperationKind;
    use serde_json::json;

    #[tokio::test]
    async fn decodes_and_applies_a_create_operation() {
        let state = Arc::new(StateMachine::new(ClusterConfig::default(), Arc::new(NoopReplicator), Arc::new(EventBus::default())));
        let sink = StateSink::new(state.clone());

        let op = StateOperation {
            id: Uuid::new_v4(),
            kind: OperationKind::Create,
            target: "widgets".into(),
            data: json!({"count": 1}),
            timestamp: chrono::Utc::now(),
            seq: 0,
            dependencies: Vec::new(),
            signature: Vec::new(),
            executor_id: Uuid::new_v4(),
        };
        let content = serde_json::to_vec(&op).unwrap();
        let proposal = ConsensusProposal::new(AgentId::new(), content);

        sink.apply_committed(&proposal, 1).await.unwrap();
        assert!(state.get("widgets").is_some());
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let state = Arc::new(StateMachine::new(ClusterConfig::default(), Arc::new(NoopReplicator), Arc::new(EventBus::default())));
        let sink = StateSink::new(state);
        let proposal = ConsensusProposal::new(AgentId::new(), b"not json".to_vec());
        assert!(sink.apply_committed(&proposal, 1).await.is_err());
    }
}
