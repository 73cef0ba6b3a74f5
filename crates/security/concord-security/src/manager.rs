//! Top-level security manager tying identity, sessions, and secure
//! messaging together behind one handle, the way the façade crate expects
//! to depend on a single type per subsystem.

use crate::error::SecurityError;
use crate::identity::IdentityManager;
use crate::message::{MessageExchange, DEFAULT_TTL_SECS};
use crate::session::SessionManager;
use crate::types::{Capability, Certificate, ReceiveOutcome, SecureMessage, Session, SecurityTrustLevel};
use crate::verification::verify_agent;
use async_trait::async_trait;
use concord_core::{
    ConcordResult, EventBus, HealthLevel, HealthStatus, Observable, ObservableState, ObservableStatus,
};
use ed25519_dalek::SigningKey;
use p384::PublicKey;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Configuration for the message exchange's rate limiting and circuit
/// breaking.
#[derive(Debug, Clone, Copy)]
pub struct SecurityConfig {
    /// Sends allowed per agent per window.
    pub max_messages_per_window: u32,
    /// Window length, seconds.
    pub rate_limit_window_secs: i64,
    /// Consecutive failures before the breaker opens.
    pub circuit_failure_threshold: u32,
    /// Seconds an open breaker waits before a half-open retry.
    pub circuit_recovery_secs: i64,
    /// Message time-to-live, seconds.
    pub message_ttl_secs: i64,
    /// How long a retired root key remains valid for verification.
    pub key_retention_secs: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_messages_per_window: 100,
            rate_limit_window_secs: 60,
            circuit_failure_threshold: 5,
            circuit_recovery_secs: 30,
            message_ttl_secs: DEFAULT_TTL_SECS,
            key_retention_secs: 3600,
        }
    }
}

/// The agent-to-agent security manager: register -> verify certificates ->
/// evaluate trust -> establish sessions -> send/receive -> revoke.
pub struct SecurityManager {
    config: SecurityConfig,
    identities: IdentityManager,
    sessions: SessionManager,
    exchange: MessageExchange,
}

impl SecurityManager {
    /// Construct a security manager with a fresh root keypair.
    #[must_use]
    pub fn new(events: Arc<EventBus>, config: SecurityConfig) -> Self {
        let exchange = MessageExchange::new(
            events.clone(),
            config.max_messages_per_window,
            config.rate_limit_window_secs,
            config.circuit_failure_threshold,
            config.circuit_recovery_secs,
        );
        Self { config, identities: IdentityManager::new(events.clone()), sessions: SessionManager::new(events), exchange }
    }

    /// Register a new agent identity.
    pub fn register(&self, certificate: Certificate) -> Result<Uuid, SecurityError> {
        Ok(self.identities.register(certificate)?.id)
    }

    /// Establish a session for `agent_id`, checking capability entitlement.
    pub fn establish_session(&self, agent_id: Uuid, capabilities: HashSet<Capability>, peer_public: &PublicKey) -> Result<(Session, PublicKey), SecurityError> {
        self.sessions.establish(&self.identities, agent_id, capabilities, peer_public)
    }

    /// Send a message, signed under this node's own root key.
    pub fn send(&self, signing_key: &SigningKey, session_id: Option<Uuid>, from: Uuid, to: Uuid, kind: impl Into<String>, payload: Vec<u8>) -> Result<SecureMessage, SecurityError> {
        let session = session_id.and_then(|id| self.sessions.get(id));
        self.exchange.send(signing_key, session.as_ref(), from, to, kind, payload)
    }

    /// Receive and validate a message.
    pub fn receive(&self, message: &SecureMessage, session_id: Option<Uuid>, required_capability: Option<Capability>) -> ReceiveOutcome {
        let session = session_id.and_then(|id| self.sessions.get(id));
        self.exchange.receive(message, &self.identities, session.as_ref(), required_capability, self.config.message_ttl_secs)
    }

    /// Re-run continuous verification for one agent.
    pub fn verify(&self, agent_id: Uuid, behavior_score: f64) -> Result<SecurityTrustLevel, SecurityError> {
        verify_agent(&self.identities, &self.sessions, agent_id, behavior_score)
    }

    /// Revoke an agent, closing every session it holds.
    pub fn revoke(&self, agent_id: Uuid) -> Result<(), SecurityError> {
        self.identities.revoke(agent_id)?;
        self.sessions.close_all_for_agent(agent_id);
        Ok(())
    }

    /// Rotate this node's root signing keypair.
    pub fn rotate_keys(&self) {
        self.identities.rotate_keys(chrono::Duration::seconds(self.config.key_retention_secs));
    }

    /// This node's current verifying key, published so peers can validate
    /// signatures produced with the matching signing key passed to
    /// [`Self::send`].
    #[must_use]
    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.identities.verifying_key()
    }

    /// Sign arbitrary bytes with this node's root key. Exposed so other
    /// components (the consensus engine's crypto bridge) can reuse the
    /// same signing material instead of holding their own keypair.
    #[must_use]
    pub fn sign_root(&self, bytes: &[u8]) -> [u8; 64] {
        self.identities.sign(bytes)
    }

    /// Fetch a registered agent's identity, used by callers (the façade's
    /// capability-authorisation step) that need the trust level directly.
    #[must_use]
    pub fn identity(&self, agent_id: Uuid) -> Option<crate::types::AgentIdentity> {
        self.identities.get(agent_id)
    }

    /// The registered verifying key for `agent_id`, if known, used by
    /// collaborators (the consensus engine's crypto bridge) that verify
    /// signatures without depending on this crate's certificate type.
    #[must_use]
    pub fn verifying_key_for(&self, agent_id: Uuid) -> Option<[u8; 32]> {
        self.identities.get(agent_id).map(|identity| identity.certificate.public_key)
    }

    /// Periodic maintenance: prune expired retired keys and the nonce store.
    pub fn run_maintenance(&self) {
        self.identities.prune_retired_keys();
        self.exchange.prune_nonces_if_needed();
    }
}

#[async_trait]
impl Observable for SecurityManager {
    async fn status(&self) -> ConcordResult<ObservableStatus> {
        Ok(ObservableStatus {
            state: ObservableState::Running,
            last_updated: chrono::Utc::now(),
            metadata: HashMap::new(),
        })
    }

    async fn health(&self) -> ConcordResult<HealthStatus> {
        Ok(HealthStatus { overall: HealthLevel::Healthy, checks: HashMap::new(), last_check: chrono::Utc::now() })
    }

    async fn metrics(&self) -> ConcordResult<HashMap<String, f64>> {
        let mut metrics = HashMap::new();
        metrics.insert("registered_identities".to_string(), self.identities.count() as f64);
        metrics.insert("open_sessions".to_string(), self.sessions.count() as f64);
        Ok(metrics)
    }

    fn describe(&self) -> String {
        format!(
            "SecurityManager(identities={}, sessions={})",
            self.identities.count(),
            self.sessions.count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, Signature};
    use p384::ecdh::EphemeralSecret;
    use rand_core::OsRng;

    fn signed_certificate(signing_key: &SigningKey, agent_id: Uuid) -> Certificate {
        let verifying_key = signing_key.verifying_key();
        let issued_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        let expires_at = chrono::Utc::now() + chrono::Duration::hours(1);
        let mut payload = Vec::new();
        payload.extend_from_slice(agent_id.as_bytes());
        payload.extend_from_slice(&verifying_key.to_bytes());
        payload.extend_from_slice(issued_at.to_rfc3339().as_bytes());
        payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
        let signature: Signature = signing_key.sign(&payload);
        Certificate { agent_id, public_key: verifying_key.to_bytes(), issued_at, expires_at, signature: signature.to_bytes().to_vec() }
    }

    #[test]
    fn end_to_end_register_session_send_receive() {
        let manager = SecurityManager::new(Arc::new(EventBus::default()), SecurityConfig::default());
        let agent_key = SigningKey::generate(&mut OsRng);
        let agent_id_seed = Uuid::new_v4();
        let cert = signed_certificate(&agent_key, agent_id_seed);
        let agent_id = manager.register(cert).unwrap();
        manager.verify(agent_id, 0.8).unwrap();

        let peer_secret = EphemeralSecret::random(&mut OsRng);
        let peer_public = peer_secret.public_key();
        let (session, _our_public) = manager.establish_session(agent_id, [Capability::Execute].into_iter().collect(), &peer_public).unwrap();

        let message = manager.send(&agent_key, Some(session.id), agent_id, Uuid::new_v4(), "op", b"payload".to_vec()).unwrap();
        let outcome = manager.receive(&message, Some(session.id), Some(Capability::Execute));
        assert!(outcome.valid);
        assert_eq!(outcome.payload.unwrap(), b"payload");
    }

    #[test]
    fn revocation_closes_sessions_and_blocks_future_sends() {
        let manager = SecurityManager::new(Arc::new(EventBus::default()), SecurityConfig::default());
        let agent_key = SigningKey::generate(&mut OsRng);
        let agent_id_seed = Uuid::new_v4();
        let cert = signed_certificate(&agent_key, agent_id_seed);
        let agent_id = manager.register(cert).unwrap();

        manager.revoke(agent_id).unwrap();

        let peer_secret = EphemeralSecret::random(&mut OsRng);
        let peer_public = peer_secret.public_key();
        assert!(manager.establish_session(agent_id, HashSet::new(), &peer_public).is_err());
    }
}
