//! Wires every component together behind a handful of named operations.
//! This is the only crate that names every concrete collaborator type;
//! security, consensus, voting, the detector, and the state machine each
//! hold only the narrow trait they need, injected here.

use crate::crypto::CryptoBridge;
use crate::error::FacadeError;
use crate::sink::{NoopReplicator, StateSink};
use crate::transport::LocalTransport;
use concord_consensus::pbft::PbftEngine;
use concord_consensus::types::{AgentId, ConsensusOutcome, Proposal as ConsensusProposal};
use concord_core::{ClusterConfig, EventBus};
use concord_detector::{Detector, Observation};
use concord_perf::PerfOptimizer;
use concord_security::{Capability, Certificate, SecurityConfig, SecurityManager};
use concord_state::{StateMachine, StateOperation};
use concord_voting::{Vote, VotingEngine, VotingProposal};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::info;
use uuid::Uuid;

type Engine = PbftEngine<LocalTransport, CryptoBridge, StateSink<NoopReplicator>>;

/// The integration façade: one handle per cluster node, owning every
/// subsystem and exposing the operations collaborators call instead of
/// reaching into individual components directly.
pub struct ConcordFacade {
    node_id: AgentId,
    events: Arc<EventBus>,
    security: Arc<SecurityManager>,
    transport: Arc<LocalTransport>,
    consensus: Arc<Engine>,
    state: Arc<StateMachine<NoopReplicator>>,
    voting: Arc<VotingEngine>,
    detector: Arc<Detector>,
    perf: Arc<PerfOptimizer>,
    inbox: AsyncMutex<mpsc::UnboundedReceiver<concord_consensus::types::PbftMessage>>,
    inbox_tx: mpsc::UnboundedSender<concord_consensus::types::PbftMessage>,
}

impl ConcordFacade {
    /// Construct a node. `active_agents` seeds the consensus engine's
    /// initial participant set; [`Self::register_consensus_agent`] admits
    /// agents discovered afterwards.
    #[must_use]
    pub fn new(
        node_id: Uuid,
        active_agents: Vec<Uuid>,
        cluster_config: ClusterConfig,
        security_config: SecurityConfig,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let security = Arc::new(SecurityManager::new(events.clone(), security_config));
        let transport = Arc::new(LocalTransport::new());
        let crypto = Arc::new(CryptoBridge::new(security.clone()));
        let state = Arc::new(StateMachine::new(cluster_config.clone(), Arc::new(NoopReplicator), events.clone()));
        let sink = Arc::new(StateSink::new(state.clone()));
        let node = AgentId(node_id);
        let consensus = Arc::new(PbftEngine::new(
            node,
            cluster_config,
            active_agents.into_iter().map(AgentId).collect(),
            transport.clone(),
            crypto,
            sink,
            events.clone(),
        ));
        let voting = Arc::new(VotingEngine::new(events.clone()));
        let detector = Arc::new(Detector::new(events.clone()));
        let perf = Arc::new(PerfOptimizer::new(concord_perf::PerfConfig::default()));
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        Self {
            node_id: node,
            events,
            security,
            transport,
            consensus,
            state,
            voting,
            detector,
            perf,
            inbox: AsyncMutex::new(inbox_rx),
            inbox_tx,
        }
    }

    /// This node's id in consensus terms.
    #[must_use]
    pub fn node_id(&self) -> AgentId {
        self.node_id
    }

    /// The sender other facades' transports deliver this node's inbound
    /// consensus traffic to; pair with [`LocalTransport::register_peer`]
    /// on peers and [`Self::drive_inbox`] to process it.
    #[must_use]
    pub fn inbox_sender(&self) -> mpsc::UnboundedSender<concord_consensus::types::PbftMessage> {
        self.inbox_tx.clone()
    }

    /// This node's outbound transport, registered into peers' transports
    /// alongside this node's id so broadcasts reach it.
    #[must_use]
    pub fn transport(&self) -> Arc<LocalTransport> {
        self.transport.clone()
    }

    /// Drain the inbox, routing every message to the consensus engine.
    /// Runs until the inbox closes; callers spawn this as a background task.
    pub async fn drive_inbox(&self) {
        loop {
            let message = {
                let mut inbox = self.inbox.lock().await;
                inbox.recv().await
            };
            match message {
                Some(message) => {
                    if let Err(err) = self.consensus.handle_message(message).await {
                        tracing::warn!(node = %self.node_id, %err, "inbound consensus message rejected");
                    }
                }
                None => return,
            }
        }
    }

    /// The shared event bus, for callers that want to subscribe directly.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Direct access to the performance optimiser, for callers that want
    /// to route proposals through batching/pipelining/speculation before
    /// calling [`Self::start_secure_byzantine_consensus`].
    #[must_use]
    pub fn perf(&self) -> Arc<PerfOptimizer> {
        self.perf.clone()
    }

    fn authorize(&self, agent_id: Uuid, required: Capability) -> Result<(), FacadeError> {
        let identity = self.security.identity(agent_id).ok_or(FacadeError::UnknownAgent(agent_id))?;
        let requested: HashSet<Capability> = [required].into_iter().collect();
        if !identity.trust_level.permits(&requested) {
            return Err(FacadeError::CapabilityDenied(agent_id));
        }
        Ok(())
    }

    /// Register a new agent identity and admit it into the consensus
    /// participant set. A freshly registered agent starts fully trusted;
    /// continuous verification (driven externally) steps it down on poor
    /// behaviour.
    pub fn register_consensus_agent(&self, certificate: Certificate) -> Result<Uuid, FacadeError> {
        let agent_id = self.security.register(certificate)?;
        self.security.verify(agent_id, 1.0)?;
        self.consensus.add_active_agent(AgentId(agent_id));
        info!(%agent_id, "consensus agent registered and admitted");
        Ok(agent_id)
    }

    /// `startSecureByzantineConsensus`: identity lookup, capability
    /// authorisation, underlying PBFT round, detector observation, audit
    /// log. Byzantine proposals are broadcast and must stay verifiable by
    /// every participant, so they are signed (via the crypto bridge) but
    /// not encrypted; payload encryption applies to point-to-point agent
    /// messaging (`concord_security::MessageExchange`), not to consensus
    /// broadcast content.
    pub async fn start_secure_byzantine_consensus(
        &self,
        proposer_id: Uuid,
        op: StateOperation,
    ) -> Result<ConsensusOutcome, FacadeError> {
        self.authorize(proposer_id, Capability::Execute)?;

        let content = serde_json::to_vec(&op)
            .map_err(|e| FacadeError::MalformedPayload(e.to_string()))?;
        let proposal = ConsensusProposal::new(AgentId(proposer_id), content);
        let digest = proposal.content_hash;

        let outcome = self.consensus.start_consensus(proposal).await?;

        self.detector.observe(
            proposer_id,
            Observation::Message {
                kind: "pre-prepare".to_string(),
                view: self.consensus.current_view().0,
                seq: 0,
                digest,
                has_last_committed: true,
                timestamp: chrono::Utc::now(),
            },
        );
        self.evict_if_quarantined(proposer_id);
        info!(%proposer_id, ?outcome, "secure byzantine consensus round completed");
        Ok(outcome)
    }

    /// `startSecureVoting`: identity lookup, capability authorisation,
    /// proposal registration, audit log.
    pub fn start_secure_voting(&self, proposer_id: Uuid, proposal: VotingProposal) -> Result<Uuid, FacadeError> {
        self.authorize(proposer_id, Capability::Execute)?;
        let proposal_id = proposal.id;
        self.voting.create_proposal(proposal);
        info!(%proposer_id, %proposal_id, "secure voting proposal opened");
        Ok(proposal_id)
    }

    /// `castSecureVote`: identity lookup, capability authorisation,
    /// underlying ballot cast, detector observation, audit log.
    pub fn cast_secure_vote(&self, voter_id: Uuid, vote: Vote) -> Result<(), FacadeError> {
        self.authorize(voter_id, Capability::Query)?;

        let proposal_id = vote.proposal_id;
        let decision = format!("{:?}", vote.decision);
        let weight = vote.weight;
        let timestamp = vote.timestamp;

        self.voting.cast_vote(vote)?;

        self.detector.observe(
            voter_id,
            Observation::Vote { proposal_id, decision, weight, timestamp },
        );
        self.evict_if_quarantined(voter_id);
        info!(%voter_id, %proposal_id, "secure vote cast");
        Ok(())
    }

    /// `executeSecureStateOperation`: identity lookup, capability
    /// authorisation, direct (non-consensus) state apply, audit log. For
    /// operations that must first clear Byzantine agreement, submit
    /// through [`Self::start_secure_byzantine_consensus`] instead; this
    /// path is for already-agreed or single-node operations.
    pub async fn execute_secure_state_operation(&self, executor_id: Uuid, op: StateOperation) -> Result<(), FacadeError> {
        self.authorize(executor_id, Capability::Execute)?;
        self.state.apply(op.clone()).await?;
        info!(%executor_id, op_id = %op.id, target = %op.target, "secure state operation executed");
        Ok(())
    }

    /// Re-run continuous verification for one agent, closing sessions and
    /// evicting it from the consensus participant set if its certificate
    /// no longer verifies.
    pub fn verify_agent(&self, agent_id: Uuid, behavior_score: f64) -> Result<(), FacadeError> {
        let level = self.security.verify(agent_id, behavior_score)?;
        if level == concord_security::SecurityTrustLevel::Untrusted {
            self.consensus.mark_malicious(AgentId(agent_id));
            self.transport.unregister_peer(&AgentId(agent_id));
        }
        Ok(())
    }

    /// Evict an agent the detector has just quarantined from the active
    /// consensus set and transport, mirroring [`Self::verify_agent`]'s
    /// eviction path. Called after every detector observation so a
    /// reputation drop below the quarantine threshold takes effect
    /// immediately, not only on the next explicit `verify_agent` call.
    fn evict_if_quarantined(&self, agent_id: Uuid) {
        if self.detector.reputation(agent_id).is_some_and(|r| r.quarantined) {
            self.consensus.mark_malicious(AgentId(agent_id));
            self.transport.unregister_peer(&AgentId(agent_id));
        }
    }

    /// Periodic maintenance: security key/nonce pruning plus state-machine
    /// pending-operation retries.
    pub async fn run_maintenance(&self) -> Result<(), FacadeError> {
        self.security.run_maintenance();
        self.state.retry_pending().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::ClusterConfig;
    use concord_state::OperationKind;
    use ed25519_dalek::{Signer, SigningKey};
    use rand_core::OsRng;
    use serde_json::json;

    fn signed_certificate(signing_key: &SigningKey, agent_id: Uuid) -> Certificate {
        let verifying_key = signing_key.verifying_key();
        let issued_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        let expires_at = chrono::Utc::now() + chrono::Duration::hours(1);
        let mut payload = Vec::new();
        payload.extend_from_slice(agent_id.as_bytes());
        payload.extend_from_slice(&verifying_key.to_bytes());
        payload.extend_from_slice(issued_at.to_rfc3339().as_bytes());
        payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
        let signature = signing_key.sign(&payload);
        Certificate { agent_id, public_key: verifying_key.to_bytes(), issued_at, expires_at, signature: signature.to_bytes().to_vec() }
    }

    /// A single-node facade whose own node id is also the registered
    /// consensus agent's id, so it is trivially the sole (and therefore
    /// leading) participant.
    fn single_node_facade() -> (ConcordFacade, Uuid) {
        let node_id = Uuid::new_v4();
        let agent_key = SigningKey::generate(&mut OsRng);
        let facade = ConcordFacade::new(node_id, vec![], ClusterConfig::default(), SecurityConfig::default());
        let cert = signed_certificate(&agent_key, node_id);
        let registered = facade.register_consensus_agent(cert).unwrap();
        assert_eq!(registered, node_id);
        (facade, node_id)
    }

    #[test]
    fn unregistered_agent_is_denied() {
        let facade = ConcordFacade::new(Uuid::new_v4(), vec![], ClusterConfig::default(), SecurityConfig::default());
        let op = StateOperation {
            id: Uuid::new_v4(),
            kind: OperationKind::Create,
            target: "x".into(),
            data: json!({}),
            timestamp: chrono::Utc::now(),
            seq: 0,
            dependencies: Vec::new(),
            signature: Vec::new(),
            executor_id: Uuid::new_v4(),
        };
        let result = tokio_test::block_on(facade.execute_secure_state_operation(Uuid::new_v4(), op));
        assert!(matches!(result, Err(FacadeError::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn registered_agent_executes_a_state_operation() {
        let (facade, agent_id) = single_node_facade();
        let op = StateOperation {
            id: Uuid::new_v4(),
            kind: OperationKind::Create,
            target: "widgets".into(),
            data: json!({"count": 1}),
            timestamp: chrono::Utc::now(),
            seq: 0,
            dependencies: Vec::new(),
            signature: Vec::new(),
            executor_id: agent_id,
        };
        facade.execute_secure_state_operation(agent_id, op).await.unwrap();
        assert!(facade.state.get("widgets").is_some());
    }

    #[tokio::test]
    async fn single_node_consensus_round_commits() {
        let (facade, agent_id) = single_node_facade();
        let op = StateOperation {
            id: Uuid::new_v4(),
            kind: OperationKind::Create,
            target: "gadgets".into(),
            data: json!({"count": 1}),
            timestamp: chrono::Utc::now(),
            seq: 0,
            dependencies: Vec::new(),
            signature: Vec::new(),
            executor_id: agent_id,
        };
        let outcome = facade.start_secure_byzantine_consensus(agent_id, op).await.unwrap();
        assert_eq!(outcome, ConsensusOutcome::Committed);
        assert!(facade.state.get("gadgets").is_some());
    }

    fn state_op(agent_id: Uuid, target: &str) -> StateOperation {
        StateOperation {
            id: Uuid::new_v4(),
            kind: OperationKind::Create,
            target: target.into(),
            data: json!({"count": 1}),
            timestamp: chrono::Utc::now(),
            seq: 0,
            dependencies: Vec::new(),
            signature: Vec::new(),
            executor_id: agent_id,
        }
    }

    #[tokio::test]
    async fn detector_quarantine_evicts_agent_from_consensus() {
        let (facade, agent_id) = single_node_facade();

        // Drive the agent's reputation into quarantine directly, the same
        // conflicting-message pattern the detector's own rule tests use.
        for _ in 0..4 {
            facade.detector.observe(
                agent_id,
                Observation::Message {
                    kind: "prepare".into(),
                    view: 1,
                    seq: 1,
                    digest: [1; 32],
                    has_last_committed: true,
                    timestamp: chrono::Utc::now(),
                },
            );
            facade.detector.observe(
                agent_id,
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
        assert!(facade.detector.reputation(agent_id).unwrap().quarantined);

        // This round still completes: the agent is only evicted once the
        // façade observes it and checks quarantine status, which happens
        // after the round commits.
        let outcome = facade.start_secure_byzantine_consensus(agent_id, state_op(agent_id, "a")).await.unwrap();
        assert_eq!(outcome, ConsensusOutcome::Committed);

        // The sole participant is now marked malicious, so no quorum can
        // be reached for a further round.
        let result = facade.start_secure_byzantine_consensus(agent_id, state_op(agent_id, "b")).await;
        assert!(result.is_err());
    }
}
