//! In-process transport: the façade is the only crate with no real network
//! in scope, so consensus messages are routed directly between co-located
//! engines via channels rather than sockets.

use async_trait::async_trait;
use concord_consensus::traits::Transport;
use concord_consensus::types::{AgentId, PbftMessage};
use concord_core::{ConcordError, ConcordResult};
use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Routes broadcast and unicast PBFT messages to whichever peers have
/// registered an inbox, simulating a network for single-process clusters
/// and tests. A peer with no registered inbox simply does not receive the
/// message, mirroring an unreachable node rather than an error.
#[derive(Default)]
pub struct LocalTransport {
    peers: DashMap<AgentId, UnboundedSender<PbftMessage>>,
}

impl LocalTransport {
    /// Construct an empty transport with no registered peers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the inbox a peer's driver loop reads from.
    pub fn register_peer(&self, agent: AgentId, inbox: UnboundedSender<PbftMessage>) {
        self.peers.insert(agent, inbox);
    }

    /// Drop a peer's inbox, e.g. after it is revoked.
    pub fn unregister_peer(&self, agent: &AgentId) {
        self.peers.remove(agent);
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn broadcast(&self, message: PbftMessage) -> ConcordResult<()> {
        for entry in self.peers.iter() {
            if *entry.key() == message.sender_id {
                continue;
            }
            if entry.value().send(message.clone()).is_err() {
                debug!(peer = %entry.key(), "dropping broadcast, peer inbox closed");
            }
        }
        Ok(())
    }

    async fn send_to(&self, to: AgentId, message: PbftMessage) -> ConcordResult<()> {
        match self.peers.get(&to) {
            Some(inbox) => inbox
                .send(message)
                .map_err(|_| ConcordError::network(format!("peer {to} inbox closed"))),
            None => Err(ConcordError::network(format!("peer {to} not reachable"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_consensus::types::{PbftPhase, ViewNumber};
    use tokio::sync::mpsc;

    fn message(sender: AgentId) -> PbftMessage {
        PbftMessage {
            phase: PbftPhase::PrePrepare,
            view: ViewNumber(0),
            seq: 1,
            digest: [0u8; 32],
            payload: None,
            timestamp: chrono::Utc::now(),
            signature: Vec::new(),
            sender_id: sender,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer_but_not_the_sender() {
        let transport = LocalTransport::new();
        let sender = AgentId::new();
        let peer_a = AgentId::new();
        let peer_b = AgentId::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        transport.register_peer(peer_a, tx_a);
        transport.register_peer(peer_b, tx_b);
        transport.register_peer(sender, mpsc::unbounded_channel().0);

        transport.broadcast(message(sender)).await.unwrap();

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_unknown_peer_errors() {
        let transport = LocalTransport::new();
        let result = transport.send_to(AgentId::new(), message(AgentId::new())).await;
        assert!(result.is_err());
    }
}
