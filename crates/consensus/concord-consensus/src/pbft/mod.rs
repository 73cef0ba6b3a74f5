//! Three-phase PBFT agreement: pre-prepare, prepare, commit.

mod round;

use crate::canonical::canonical_bytes;
use crate::error::ConsensusError;
use crate::traits::{ConsensusCrypto, ConsensusStats, ProposalSink, Transport};
use crate::types::{AgentId, ConsensusOutcome, PbftMessage, PbftPhase, Proposal, SeqNumber, ViewNumber};
use async_trait::async_trait;
use concord_core::{
    ClusterConfig, ConcordError, ConcordResult, EventBus, HealthLevel, HealthStatus, Observable,
    ObservableState, ObservableStatus, ConcordEvent,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use round::RoundState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key identifying one PBFT round: the `(view, seq)` pair a pre-prepare was
/// issued for.
pub type RoundKey = (ViewNumber, SeqNumber);

/// The PBFT consensus engine.
///
/// Generic over the transport, crypto, and proposal-sink collaborators so
/// tests can substitute in-memory fakes without standing up a network.
pub struct PbftEngine<T, C, S> {
    node_id: AgentId,
    config: ClusterConfig,
    transport: Arc<T>,
    crypto: Arc<C>,
    sink: Arc<S>,
    events: Arc<EventBus>,

    view: RwLock<ViewNumber>,
    active_agents: RwLock<Vec<AgentId>>,
    malicious: DashMap<AgentId, ()>,
    rounds: DashMap<RoundKey, Arc<RoundState>>,
    next_seq: AtomicU64,
    low_watermark: AtomicU64,
    stats: RwLock<ConsensusStats>,
}

impl<T, C, S> PbftEngine<T, C, S>
where
    T: Transport,
    C: ConsensusCrypto,
    S: ProposalSink,
{
    /// Construct a new engine. `active_agents` must already be sorted the
    /// same way on every node (leader selection depends on the ordering).
    pub fn new(
        node_id: AgentId,
        config: ClusterConfig,
        mut active_agents: Vec<AgentId>,
        transport: Arc<T>,
        crypto: Arc<C>,
        sink: Arc<S>,
        events: Arc<EventBus>,
    ) -> Self {
        active_agents.sort();
        Self {
            node_id,
            config,
            transport,
            crypto,
            sink,
            events,
            view: RwLock::new(ViewNumber(0)),
            active_agents: RwLock::new(active_agents),
            malicious: DashMap::new(),
            rounds: DashMap::new(),
            next_seq: AtomicU64::new(1),
            low_watermark: AtomicU64::new(0),
            stats: RwLock::new(ConsensusStats::default()),
        }
    }

    /// `f = floor((n-1)/3)` computed over the currently active agent set.
    #[must_use]
    pub fn byzantine_threshold(&self) -> usize {
        let n = self.active_agents.read().len();
        n.saturating_sub(1) / 3
    }

    /// `leader(v) = activeAgents_sorted[v mod |activeAgents|]`.
    #[must_use]
    pub fn leader(&self, view: ViewNumber) -> Option<AgentId> {
        let agents = self.active_agents.read();
        if agents.is_empty() {
            return None;
        }
        Some(agents[(view.0 as usize) % agents.len()])
    }

    /// Whether this node is the leader of the current view.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader(*self.view.read()) == Some(self.node_id)
    }

    /// Current view number.
    #[must_use]
    pub fn current_view(&self) -> ViewNumber {
        *self.view.read()
    }

    /// Mark an agent as malicious; its messages are rejected from now on.
    pub fn mark_malicious(&self, agent: AgentId) {
        self.malicious.insert(agent, ());
    }

    /// Admit a newly registered agent into the active participant set,
    /// re-sorting so leader selection stays consistent across nodes.
    pub fn add_active_agent(&self, agent: AgentId) {
        let mut agents = self.active_agents.write();
        if !agents.contains(&agent) {
            agents.push(agent);
            agents.sort();
        }
    }

    /// Advance to a new view, clearing per-view round bookkeeping that is
    /// no longer relevant (prepared-but-not-committed rounds from the old
    /// view are handled by the caller, the view-change module, which
    /// re-drives them through `start_consensus` for the new leader).
    pub fn advance_view(&self, new_view: ViewNumber) {
        *self.view.write() = new_view;
    }

    fn non_malicious_active_count(&self) -> usize {
        let agents = self.active_agents.read();
        agents.iter().filter(|a| !self.malicious.contains_key(*a)).count()
    }

    /// `startConsensus(proposal) -> committed | aborted`.
    ///
    /// Caller must be the current leader. Broadcasts a pre-prepare, then
    /// awaits `2f+1` commits (bounded by `consensus_timeout`).
    pub async fn start_consensus(&self, proposal: Proposal) -> ConcordResult<ConsensusOutcome> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader.into());
        }
        let quorum_needed = self.byzantine_quorum();
        if self.non_malicious_active_count() < quorum_needed {
            return Err(ConsensusError::NoQuorum.into());
        }

        let view = self.current_view();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let digest = proposal.content_hash;
        let key = (view, seq);
        let round = self.rounds.entry(key).or_insert_with(|| Arc::new(RoundState::new(digest, proposal.clone()))).clone();

        let pre_prepare = self.build_message(PbftPhase::PrePrepare, view, seq, digest, Some(proposal.content.clone()));
        self.transport.broadcast(pre_prepare).await?;

        // The leader also treats its own pre-prepare as an implicit prepare.
        round.prepares.insert(self.node_id);
        self.broadcast_prepare_if_threshold(&round, view, seq, digest).await?;

        match tokio::time::timeout(self.config.consensus_timeout, round.wait_for_commit()).await {
            Ok(()) => {
                self.sink.apply_committed(&proposal, seq).await?;
                self.stats.write().committed += 1;
                self.events.publish(ConcordEvent::ConsensusReached { proposal_id: proposal.id, seq });
                Ok(ConsensusOutcome::Committed)
            }
            Err(_) => {
                self.stats.write().aborted += 1;
                warn!(?view, seq, "consensus round timed out awaiting commit quorum");
                Err(ConsensusError::Timeout.into())
            }
        }
    }

    /// Validate and route an inbound message to its phase handler.
    pub async fn handle_message(&self, message: PbftMessage) -> ConcordResult<()> {
        self.validate_message(&message)?;

        match message.phase {
            PbftPhase::PrePrepare => self.handle_pre_prepare(message).await,
            PbftPhase::Prepare => self.handle_prepare(message).await,
            PbftPhase::Commit => self.handle_commit(message).await,
            PbftPhase::ViewChange | PbftPhase::NewView => {
                // View-change messages are routed to the view-change module
                // by the facade; the PBFT engine itself only validates them.
                Ok(())
            }
        }
    }

    fn validate_message(&self, message: &PbftMessage) -> ConcordResult<()> {
        if self.malicious.contains_key(&message.sender_id) {
            return Err(ConsensusError::MaliciousSender(message.sender_id).into());
        }
        if !self.active_agents.read().contains(&message.sender_id) {
            return Err(ConsensusError::UnknownSender(message.sender_id).into());
        }
        let current_view = self.current_view();
        if message.view < current_view {
            return Err(ConsensusError::StaleView { message_view: message.view, current_view }.into());
        }
        if matches!(message.phase, PbftPhase::PrePrepare | PbftPhase::Prepare | PbftPhase::Commit) {
            let low = self.low_watermark.load(Ordering::SeqCst);
            let window = self.config.checkpoint_interval.max(1);
            if message.seq <= low || message.seq > low + window {
                return Err(ConsensusError::SeqOutOfWindow { seq: message.seq }.into());
            }
        }
        let bytes = canonical_bytes(message);
        if !self.crypto.verify(message.sender_id, &bytes, &message.signature) {
            return Err(ConsensusError::InvalidSignature.into());
        }
        if message.phase == PbftPhase::PrePrepare && Some(message.sender_id) != self.leader(message.view) {
            return Err(ConsensusError::NotLeaderSender { sender: message.sender_id }.into());
        }
        Ok(())
    }

    async fn handle_pre_prepare(&self, message: PbftMessage) -> ConcordResult<()> {
        let key = (message.view, message.seq);
        let content = message.payload.clone().unwrap_or_default();
        let proposal = Proposal::new(message.sender_id, content);

        if let Some(existing) = self.rounds.get(&key) {
            if existing.digest != message.digest {
                self.events.publish(ConcordEvent::Threat {
                    agent_id: Some(message.sender_id.0),
                    reason: "conflicting-messages".into(),
                });
                return Err(ConsensusError::ConflictingProposal { view: message.view, seq: message.seq }.into());
            }
        } else {
            self.rounds.insert(key, Arc::new(RoundState::new(message.digest, proposal)));
        }

        let round = self.rounds.get(&key).expect("round just inserted or confirmed present").clone();
        round.prepares.insert(self.node_id);
        self.broadcast_prepare_if_threshold(&round, message.view, message.seq, message.digest).await
    }

    async fn broadcast_prepare_if_threshold(
        &self,
        round: &Arc<RoundState>,
        view: ViewNumber,
        seq: SeqNumber,
        digest: [u8; 32],
    ) -> ConcordResult<()> {
        let prepare = self.build_message(PbftPhase::Prepare, view, seq, digest, None);
        self.transport.broadcast(prepare).await?;
        self.maybe_advance_to_commit(round, view, seq, digest).await
    }

    async fn handle_prepare(&self, message: PbftMessage) -> ConcordResult<()> {
        let key = (message.view, message.seq);
        let round = self
            .rounds
            .entry(key)
            .or_insert_with(|| Arc::new(RoundState::new(message.digest, Proposal::new(message.sender_id, Vec::new()))))
            .clone();
        round.prepares.insert(message.sender_id);
        self.maybe_advance_to_commit(&round, message.view, message.seq, message.digest).await
    }

    async fn maybe_advance_to_commit(
        &self,
        round: &Arc<RoundState>,
        view: ViewNumber,
        seq: SeqNumber,
        digest: [u8; 32],
    ) -> ConcordResult<()> {
        let f = self.byzantine_threshold();
        if round.prepares.len() >= 2 * f && !round.commit_broadcast.swap(true, Ordering::SeqCst) {
            let commit = self.build_message(PbftPhase::Commit, view, seq, digest, None);
            self.transport.broadcast(commit).await?;
            round.commits.insert(self.node_id);
            self.maybe_commit(round, view, seq);
        }
        Ok(())
    }

    async fn handle_commit(&self, message: PbftMessage) -> ConcordResult<()> {
        let key = (message.view, message.seq);
        let round = self
            .rounds
            .entry(key)
            .or_insert_with(|| Arc::new(RoundState::new(message.digest, Proposal::new(message.sender_id, Vec::new()))))
            .clone();
        round.commits.insert(message.sender_id);
        self.maybe_commit(&round, message.view, message.seq);
        Ok(())
    }

    fn maybe_commit(&self, round: &Arc<RoundState>, view: ViewNumber, seq: SeqNumber) {
        let quorum = self.byzantine_quorum();
        if round.commits.len() >= quorum {
            debug!(?view, seq, "commit quorum reached");
            self.low_watermark.fetch_max(seq, Ordering::SeqCst);
            round.signal_commit();
        }
    }

    fn byzantine_quorum(&self) -> usize {
        let n = self.active_agents.read().len();
        (2 * n) / 3 + 1
    }

    fn build_message(
        &self,
        phase: PbftPhase,
        view: ViewNumber,
        seq: SeqNumber,
        digest: [u8; 32],
        payload: Option<Vec<u8>>,
    ) -> PbftMessage {
        let mut message = PbftMessage {
            phase,
            view,
            seq,
            digest,
            payload,
            timestamp: chrono::Utc::now(),
            signature: Vec::new(),
            sender_id: self.node_id,
        };
        message.signature = self.crypto.sign(&canonical_bytes(&message));
        message
    }
}

#[async_trait]
impl<T, C, S> Observable for PbftEngine<T, C, S>
where
    T: Transport,
    C: ConsensusCrypto,
    S: ProposalSink,
{
    async fn status(&self) -> ConcordResult<ObservableStatus> {
        Ok(ObservableStatus {
            state: ObservableState::Running,
            last_updated: chrono::Utc::now(),
            metadata: HashMap::new(),
        })
    }

    async fn health(&self) -> ConcordResult<HealthStatus> {
        let overall = if self.non_malicious_active_count() >= self.byzantine_quorum() {
            HealthLevel::Healthy
        } else {
            HealthLevel::Critical
        };
        Ok(HealthStatus { overall, checks: HashMap::new(), last_check: chrono::Utc::now() })
    }

    async fn metrics(&self) -> ConcordResult<HashMap<String, f64>> {
        let stats = *self.stats.read();
        let mut metrics = HashMap::new();
        metrics.insert("committed".to_string(), stats.committed as f64);
        metrics.insert("aborted".to_string(), stats.aborted as f64);
        metrics.insert("view_changes".to_string(), stats.view_changes as f64);
        Ok(metrics)
    }

    fn describe(&self) -> String {
        format!("PbftEngine(node={}, view={:?})", self.node_id, self.current_view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use tokio::sync::Mutex as AsyncMutex;

    struct LoopbackTransport {
        inbox: Arc<AsyncMutex<Vec<PbftMessage>>>,
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn broadcast(&self, message: PbftMessage) -> ConcordResult<()> {
            self.inbox.lock().await.push(message);
            Ok(())
        }

        async fn send_to(&self, _to: AgentId, message: PbftMessage) -> ConcordResult<()> {
            self.inbox.lock().await.push(message);
            Ok(())
        }
    }

    struct NoopCrypto;
    impl ConsensusCrypto for NoopCrypto {
        fn sign(&self, _bytes: &[u8]) -> Vec<u8> {
            vec![1, 2, 3]
        }
        fn verify(&self, _signer: AgentId, _bytes: &[u8], _signature: &[u8]) -> bool {
            true
        }
    }

    struct RecordingSink {
        applied: Arc<StdAtomicBool>,
    }

    #[async_trait]
    impl ProposalSink for RecordingSink {
        async fn apply_committed(&self, _proposal: &Proposal, _seq: u64) -> ConcordResult<()> {
            self.applied.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn make_engine(
        node: AgentId,
        agents: Vec<AgentId>,
    ) -> (PbftEngine<LoopbackTransport, NoopCrypto, RecordingSink>, Arc<StdAtomicBool>) {
        let applied = Arc::new(StdAtomicBool::new(false));
        let engine = PbftEngine::new(
            node,
            ClusterConfig::default().with_total_agents(agents.len()).with_consensus_timeout(Duration::from_millis(500)),
            agents,
            Arc::new(LoopbackTransport { inbox: Arc::new(AsyncMutex::new(Vec::new())) }),
            Arc::new(NoopCrypto),
            Arc::new(RecordingSink { applied: applied.clone() }),
            Arc::new(EventBus::default()),
        );
        (engine, applied)
    }

    #[test]
    fn leader_is_deterministic_round_robin() {
        let a = AgentId::new();
        let b = AgentId::new();
        let mut agents = vec![a, b];
        agents.sort();
        let (engine, _applied) = make_engine(agents[0], agents.clone());
        assert_eq!(engine.leader(ViewNumber(0)), Some(agents[0]));
        assert_eq!(engine.leader(ViewNumber(1)), Some(agents[1]));
    }

    #[tokio::test]
    async fn non_leader_cannot_start_consensus() {
        let a = AgentId::new();
        let b = AgentId::new();
        let mut agents = vec![a, b];
        agents.sort();
        // deliberately construct the engine as the non-leader for view 0
        let non_leader = agents[1];
        let (engine, _applied) = make_engine(non_leader, agents);
        let proposal = Proposal::new(non_leader, b"x".to_vec());
        let result = engine.start_consensus(proposal).await;
        assert!(matches!(result, Err(ConcordError::Auth(_))));
    }

    #[tokio::test]
    async fn single_node_cluster_commits_its_own_proposal() {
        let node = AgentId::new();
        let (engine, applied) = make_engine(node, vec![node]);
        let proposal = Proposal::new(node, b"hello".to_vec());
        let outcome = engine.start_consensus(proposal).await.unwrap();
        assert_eq!(outcome, ConsensusOutcome::Committed);
        assert!(applied.load(Ordering::SeqCst));
    }
}
