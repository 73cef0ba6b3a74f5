//! Agent identity lifecycle: register, verify certificates, evaluate
//! initial trust, revoke. Also owns the root signing keypair and its
//! periodic rotation.

use crate::error::SecurityError;
use crate::types::{AgentIdentity, Certificate, SecurityTrustLevel};
use concord_core::{ConcordEvent, EventBus};
use dashmap::DashMap;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use rand_core::OsRng;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A retired root key, kept until its certificates have all expired so
/// signatures issued under it can still be verified.
struct RetiredKey {
    verifying_key: VerifyingKey,
    retired_at: chrono::DateTime<chrono::Utc>,
    valid_until: chrono::DateTime<chrono::Utc>,
}

/// Owns every registered agent's identity plus this node's own signing
/// material.
pub struct IdentityManager {
    events: Arc<EventBus>,
    identities: DashMap<Uuid, AgentIdentity>,
    signing_key: RwLock<SigningKey>,
    retired_keys: RwLock<Vec<RetiredKey>>,
}

impl IdentityManager {
    /// Construct a manager with a freshly generated root keypair.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            identities: DashMap::new(),
            signing_key: RwLock::new(SigningKey::generate(&mut OsRng)),
            retired_keys: RwLock::new(Vec::new()),
        }
    }

    /// This node's current verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.read().verifying_key()
    }

    /// Sign `message` with the current root key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.read().sign(message).to_bytes()
    }

    /// Register a new agent after verifying its certificate, assigning it
    /// an initial trust level of [`SecurityTrustLevel::Basic`].
    pub fn register(&self, certificate: Certificate) -> Result<AgentIdentity, SecurityError> {
        self.verify_certificate(&certificate)?;
        let identity = AgentIdentity {
            id: certificate.agent_id,
            certificate,
            trust_level: SecurityTrustLevel::Basic,
            behavior_score: 1.0,
            registered_at: chrono::Utc::now(),
            revoked: false,
        };
        self.identities.insert(identity.id, identity.clone());
        self.events.publish(ConcordEvent::AgentRegistered { agent_id: identity.id });
        info!(agent_id = %identity.id, "agent registered");
        Ok(identity)
    }

    /// Verify a certificate's validity window and self-consistency. A
    /// production deployment would additionally check the issuer's
    /// signature against a trusted root; this manager verifies the
    /// self-signature (the subject signs its own key material), which is
    /// sufficient to prove possession of the private key.
    pub fn verify_certificate(&self, certificate: &Certificate) -> Result<(), SecurityError> {
        let now = chrono::Utc::now();
        if now < certificate.issued_at || now > certificate.expires_at {
            return Err(SecurityError::InvalidCertificate(certificate.agent_id));
        }
        let verifying_key = VerifyingKey::from_bytes(&certificate.public_key)
            .map_err(|_| SecurityError::InvalidCertificate(certificate.agent_id))?;
        let signature_bytes: [u8; 64] = certificate
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| SecurityError::InvalidCertificate(certificate.agent_id))?;
        let signature = ed25519_dalek::Signature::from_bytes(&signature_bytes);
        let payload = Self::certificate_payload(certificate);
        verifying_key
            .verify(&payload, &signature)
            .map_err(|_| SecurityError::InvalidCertificate(certificate.agent_id))
    }

    fn certificate_payload(certificate: &Certificate) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(certificate.agent_id.as_bytes());
        payload.extend_from_slice(&certificate.public_key);
        payload.extend_from_slice(certificate.issued_at.to_rfc3339().as_bytes());
        payload.extend_from_slice(certificate.expires_at.to_rfc3339().as_bytes());
        payload
    }

    /// Evaluate (or re-evaluate) an agent's trust level from its current
    /// behaviour score, per the capability matrix's thresholds.
    pub fn evaluate_trust(&self, agent_id: Uuid, behavior_score: f64) -> Result<SecurityTrustLevel, SecurityError> {
        let mut identity = self.identities.get_mut(&agent_id).ok_or(SecurityError::UnknownAgent(agent_id))?;
        identity.behavior_score = behavior_score;
        identity.trust_level = if behavior_score >= 0.9 {
            SecurityTrustLevel::Trusted
        } else if behavior_score >= 0.7 {
            SecurityTrustLevel::Verified
        } else if behavior_score >= 0.5 {
            SecurityTrustLevel::Basic
        } else {
            SecurityTrustLevel::Untrusted
        };
        Ok(identity.trust_level)
    }

    /// Fetch an identity by id.
    #[must_use]
    pub fn get(&self, agent_id: Uuid) -> Option<AgentIdentity> {
        self.identities.get(&agent_id).map(|i| i.clone())
    }

    /// Directly set an identity's trust level, bypassing score-based
    /// evaluation. Used by continuous verification's step-down, which
    /// moves at most one level regardless of what the raw score implies.
    pub fn set_trust_level(&self, agent_id: Uuid, trust_level: SecurityTrustLevel) -> Result<(), SecurityError> {
        let mut identity = self.identities.get_mut(&agent_id).ok_or(SecurityError::UnknownAgent(agent_id))?;
        identity.trust_level = trust_level;
        Ok(())
    }

    /// Revoke an identity, dropping it to [`SecurityTrustLevel::Untrusted`]
    /// and marking it revoked. The caller (security manager) is
    /// responsible for closing any open sessions.
    pub fn revoke(&self, agent_id: Uuid) -> Result<(), SecurityError> {
        let mut identity = self.identities.get_mut(&agent_id).ok_or(SecurityError::UnknownAgent(agent_id))?;
        identity.revoked = true;
        identity.trust_level = SecurityTrustLevel::Untrusted;
        warn!(%agent_id, "agent identity revoked");
        Ok(())
    }

    /// Rotate the root signing keypair, retaining the previous key for
    /// `retention` so signatures it issued remain verifiable until expiry.
    pub fn rotate_keys(&self, retention: chrono::Duration) {
        let old_key = {
            let mut signing_key = self.signing_key.write();
            std::mem::replace(&mut *signing_key, SigningKey::generate(&mut OsRng))
        };
        let now = chrono::Utc::now();
        self.retired_keys.write().push(RetiredKey {
            verifying_key: old_key.verifying_key(),
            retired_at: now,
            valid_until: now + retention,
        });
        self.events.publish(ConcordEvent::KeysRotated { rotated_at: now });
        info!("root signing key rotated");
    }

    /// Verify a signature against either the current key or any
    /// not-yet-expired retired key.
    #[must_use]
    pub fn verify_with_any_key(&self, message: &[u8], signature: &ed25519_dalek::Signature) -> bool {
        if self.signing_key.read().verifying_key().verify(message, signature).is_ok() {
            return true;
        }
        let now = chrono::Utc::now();
        self.retired_keys
            .read()
            .iter()
            .filter(|k| k.valid_until >= now)
            .any(|k| k.verifying_key.verify(message, signature).is_ok())
    }

    /// Drop retired keys whose retention window has elapsed.
    pub fn prune_retired_keys(&self) {
        let now = chrono::Utc::now();
        self.retired_keys.write().retain(|k| k.valid_until >= now);
    }

    /// Number of registered identities (including revoked ones).
    #[must_use]
    pub fn count(&self) -> usize {
        self.identities.len()
    }
}
