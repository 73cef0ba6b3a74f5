//! Secure session establishment: capability authorisation, ECDH key
//! agreement, and HKDF key derivation.

use crate::error::SecurityError;
use crate::identity::IdentityManager;
use crate::types::{Capability, Session};
use concord_core::{ConcordEvent, EventBus};
use dashmap::DashMap;
use hkdf::Hkdf;
use p384::ecdh::EphemeralSecret;
use p384::PublicKey;
use rand_core::OsRng;
use sha2::Sha256;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Owns every established session.
pub struct SessionManager {
    events: Arc<EventBus>,
    sessions: DashMap<Uuid, Session>,
    by_agent: DashMap<Uuid, Vec<Uuid>>,
}

impl SessionManager {
    /// Construct an empty session manager.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { events, sessions: DashMap::new(), by_agent: DashMap::new() }
    }

    /// Establish a session for `agent_id` requesting `capabilities`,
    /// checking the agent's current trust level permits all of them, then
    /// running ECDH + HKDF to derive per-session `encryption_key`/`mac_key`.
    /// `peer_public` is the caller's ephemeral ECDH public key; the
    /// returned tuple carries this side's ephemeral public key so the
    /// caller can complete its own derivation.
    pub fn establish(
        &self,
        identities: &IdentityManager,
        agent_id: Uuid,
        capabilities: HashSet<Capability>,
        peer_public: &PublicKey,
    ) -> Result<(Session, PublicKey), SecurityError> {
        let identity = identities.get(agent_id).ok_or(SecurityError::UnknownAgent(agent_id))?;
        if identity.revoked {
            return Err(SecurityError::Revoked(agent_id));
        }
        if !identity.trust_level.permits(&capabilities) {
            return Err(SecurityError::CapabilityDenied(agent_id));
        }

        let our_secret = EphemeralSecret::random(&mut OsRng);
        let our_public = our_secret.public_key();
        let shared = our_secret.diffie_hellman(peer_public);

        let session_id = Uuid::new_v4();
        let salt = session_id.as_bytes();
        let hk = Hkdf::<Sha256>::new(Some(salt), shared.raw_secret_bytes().as_slice());
        let mut okm = [0u8; 64];
        hk.expand(b"concord-session-keys", &mut okm).expect("64-byte okm within HKDF-SHA256 limits");
        let mut encryption_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        encryption_key.copy_from_slice(&okm[..32]);
        mac_key.copy_from_slice(&okm[32..]);

        let session = Session {
            id: session_id,
            agent_id,
            capabilities,
            encryption_key,
            mac_key,
            established_at: chrono::Utc::now(),
        };
        self.sessions.insert(session_id, session.clone());
        self.by_agent.entry(agent_id).or_default().push(session_id);
        self.events.publish(ConcordEvent::SessionEstablished { session_id, agent_id });
        info!(%agent_id, %session_id, "secure session established");

        Ok((session, our_public))
    }

    /// Fetch a session by id.
    #[must_use]
    pub fn get(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    /// Close one session.
    pub fn close(&self, session_id: Uuid) {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            if let Some(mut ids) = self.by_agent.get_mut(&session.agent_id) {
                ids.retain(|id| *id != session_id);
            }
        }
    }

    /// Close every session belonging to `agent_id`, used on revocation.
    pub fn close_all_for_agent(&self, agent_id: Uuid) {
        if let Some((_, ids)) = self.by_agent.remove(&agent_id) {
            for id in ids {
                self.sessions.remove(&id);
            }
        }
    }

    /// Number of currently open sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Certificate;
    use ed25519_dalek::{Signer, SigningKey};

    fn registered_identity(identities: &IdentityManager) -> Uuid {
        let agent_key = SigningKey::generate(&mut OsRng);
        let agent_id = Uuid::new_v4();
        let verifying_key = agent_key.verifying_key();
        let issued_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        let expires_at = chrono::Utc::now() + chrono::Duration::hours(1);
        let mut payload = Vec::new();
        payload.extend_from_slice(agent_id.as_bytes());
        payload.extend_from_slice(&verifying_key.to_bytes());
        payload.extend_from_slice(issued_at.to_rfc3339().as_bytes());
        payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
        let signature = agent_key.sign(&payload);
        let cert = Certificate {
            agent_id,
            public_key: verifying_key.to_bytes(),
            issued_at,
            expires_at,
            signature: signature.to_bytes().to_vec(),
        };
        identities.register(cert).unwrap();
        agent_id
    }

    #[test]
    fn basic_trust_rejects_execute_capability() {
        let identities = IdentityManager::new(Arc::new(EventBus::default()));
        let sessions = SessionManager::new(Arc::new(EventBus::default()));
        let agent_id = registered_identity(&identities);

        let peer_secret = EphemeralSecret::random(&mut OsRng);
        let peer_public = peer_secret.public_key();

        let result = sessions.establish(&identities, agent_id, [Capability::Execute].into_iter().collect(), &peer_public);
        assert!(matches!(result, Err(SecurityError::CapabilityDenied(_))));
    }

    #[test]
    fn verified_trust_permits_execute_and_derives_matching_keys() {
        let identities = IdentityManager::new(Arc::new(EventBus::default()));
        let sessions = SessionManager::new(Arc::new(EventBus::default()));
        let agent_id = registered_identity(&identities);
        identities.evaluate_trust(agent_id, 0.8).unwrap();

        let peer_secret = EphemeralSecret::random(&mut OsRng);
        let peer_public = peer_secret.public_key();

        let (session, our_public) = sessions
            .establish(&identities, agent_id, [Capability::Execute].into_iter().collect(), &peer_public)
            .unwrap();

        // The peer completes the same derivation from its side and should
        // land on the same encryption key.
        let shared = peer_secret.diffie_hellman(&our_public);
        let hk = Hkdf::<Sha256>::new(Some(session.id.as_bytes()), shared.raw_secret_bytes().as_slice());
        let mut okm = [0u8; 64];
        hk.expand(b"concord-session-keys", &mut okm).unwrap();
        assert_eq!(&okm[..32], &session.encryption_key[..]);
    }
}
