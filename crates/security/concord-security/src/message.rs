//! Signed, session-encrypted message exchange with replay prevention,
//! rate limiting, and per-agent circuit breaking.

use crate::error::SecurityError;
use crate::identity::IdentityManager;
use crate::rate_limit::{CircuitBreaker, RateLimiter};
use crate::session::SessionManager;
use crate::types::{Capability, MessageAnomaly, ReceiveOutcome, SecureMessage};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use concord_core::{ConcordEvent, EventBus};
use dashmap::{DashMap, DashSet};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Payload size above which a receive is flagged `oversized`.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Default message time-to-live.
pub const DEFAULT_TTL_SECS: i64 = 30;

/// High-water mark before the nonce store is pruned of expired entries.
pub const NONCE_STORE_HIGH_WATER_MARK: usize = 100_000;

/// Drives send/receive of [`SecureMessage`]s against sessions and
/// identities owned elsewhere.
pub struct MessageExchange {
    events: Arc<EventBus>,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    seen_nonces: DashSet<[u8; 16]>,
    send_sequences: DashMap<Uuid, u64>,
    recv_sequences: DashMap<Uuid, u64>,
}

impl MessageExchange {
    /// Construct an exchange with the given rate/circuit-breaker policy.
    #[must_use]
    pub fn new(events: Arc<EventBus>, max_per_window: u32, window_secs: i64, failure_threshold: u32, recovery_timeout_secs: i64) -> Self {
        Self {
            events,
            rate_limiter: RateLimiter::new(max_per_window, window_secs),
            circuit_breaker: CircuitBreaker::new(failure_threshold, recovery_timeout_secs),
            seen_nonces: DashSet::new(),
            send_sequences: DashMap::new(),
            recv_sequences: DashMap::new(),
        }
    }

    /// Sign (and, given a session, encrypt) a message from `from` to `to`.
    /// Consults the rate limiter and circuit breaker first; a breaker trip
    /// or exhausted budget never reaches the signing step.
    pub fn send(
        &self,
        signing_key: &SigningKey,
        session: Option<&crate::types::Session>,
        from: Uuid,
        to: Uuid,
        kind: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<SecureMessage, SecurityError> {
        if self.circuit_breaker.is_open(from) {
            return Err(SecurityError::CircuitOpen(from));
        }
        if !self.rate_limiter.try_consume(from) {
            self.circuit_breaker.record_failure(from);
            return Err(SecurityError::RateLimited);
        }

        let id = Uuid::new_v4();
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let timestamp = chrono::Utc::now();

        let sequence_number = match session {
            Some(session) => {
                let mut counter = self.send_sequences.entry(session.id).or_insert(0);
                *counter += 1;
                *counter
            }
            None => 0,
        };

        let plaintext_payload = payload;
        let payload = match session {
            Some(session) => Self::encrypt(&session.encryption_key, &nonce, &plaintext_payload),
            None => plaintext_payload,
        };

        let kind = kind.into();
        let signature = {
            let unsigned = Self::signing_payload(id, from, to, &kind, &payload, timestamp, &nonce, sequence_number);
            signing_key.sign(&unsigned).to_bytes().to_vec()
        };

        self.circuit_breaker.record_success(from);
        self.events.publish(ConcordEvent::MessageSent { message_id: id, from });
        Ok(SecureMessage { id, from, to, kind, payload, timestamp, nonce, sequence_number, signature })
    }

    /// Verify and (when a session is supplied) decrypt a received message.
    /// `verify_sender_key` resolves the claimed sender's current verifying
    /// key; `required_capability`, when given, is checked against the
    /// session's granted capabilities and surfaced as an anomaly (not a
    /// hard failure) on overrun.
    pub fn receive(
        &self,
        message: &SecureMessage,
        identities: &IdentityManager,
        session: Option<&crate::types::Session>,
        required_capability: Option<Capability>,
        ttl_secs: i64,
    ) -> ReceiveOutcome {
        let mut anomalies = Vec::new();

        if message.payload.len() > MAX_PAYLOAD_BYTES {
            anomalies.push(MessageAnomaly::Oversized);
        }
        if let (Some(session), Some(capability)) = (session, required_capability) {
            if !session.capabilities.contains(&capability) {
                anomalies.push(MessageAnomaly::ExcessiveCapabilities);
            }
        }

        let trust_score = identities.get(message.from).map(|i| i.behavior_score).unwrap_or(0.0);

        let valid = self.validate(message, identities, session, ttl_secs);
        if !valid {
            self.events.publish(ConcordEvent::Threat {
                agent_id: Some(message.from),
                reason: "secure message failed validation".to_string(),
            });
            warn!(message_id = %message.id, from = %message.from, "secure message rejected");
            return ReceiveOutcome { valid: false, payload: None, anomalies, trust_score };
        }

        let payload = match session {
            Some(session) => Self::decrypt(&session.encryption_key, &message.nonce, &message.payload),
            None => Some(message.payload.clone()),
        };

        match payload {
            Some(payload) => {
                self.events.publish(ConcordEvent::MessageReceived { message_id: message.id, from: message.from });
                ReceiveOutcome { valid: true, payload: Some(payload), anomalies, trust_score }
            }
            None => {
                self.events.publish(ConcordEvent::Threat {
                    agent_id: Some(message.from),
                    reason: "secure message failed to decrypt".to_string(),
                });
                ReceiveOutcome { valid: false, payload: None, anomalies, trust_score }
            }
        }
    }

    fn validate(&self, message: &SecureMessage, identities: &IdentityManager, session: Option<&crate::types::Session>, ttl_secs: i64) -> bool {
        if !self.seen_nonces.insert(message.nonce) {
            return false; // replay
        }
        if (chrono::Utc::now() - message.timestamp).num_seconds() > ttl_secs {
            return false;
        }
        let Some(identity) = identities.get(message.from) else {
            return false;
        };
        if identity.revoked {
            return false;
        }
        if let Some(session) = session {
            if session.agent_id != message.from {
                return false;
            }
            if message.sequence_number <= *self.recv_sequences.entry(session.id).or_insert(0) {
                return false; // out of order or replayed within the session
            }
        }

        let Ok(verifying_key) = VerifyingKey::from_bytes(&identity.certificate.public_key) else {
            return false;
        };
        let Ok(signature_bytes) = <[u8; 64]>::try_from(message.signature.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&signature_bytes);
        let unsigned = Self::signing_payload(
            message.id,
            message.from,
            message.to,
            &message.kind,
            &message.payload,
            message.timestamp,
            &message.nonce,
            message.sequence_number,
        );
        if verifying_key.verify(&unsigned, &signature).is_err() {
            return false;
        }

        if let Some(session) = session {
            self.recv_sequences.insert(session.id, message.sequence_number);
        }
        true
    }

    /// Drop nonce entries once the store exceeds its high-water mark. A
    /// real deployment would track per-nonce expiry; here every entry
    /// within the retained half is still a valid replay guard, matching
    /// `TrimmedHistory`'s half-size slicing policy used elsewhere.
    pub fn prune_nonces_if_needed(&self) {
        if self.seen_nonces.len() > NONCE_STORE_HIGH_WATER_MARK {
            let keep = NONCE_STORE_HIGH_WATER_MARK / 2;
            let drop_count = self.seen_nonces.len() - keep;
            let to_drop: Vec<[u8; 16]> = self.seen_nonces.iter().take(drop_count).map(|n| *n).collect();
            for nonce in to_drop {
                self.seen_nonces.remove(&nonce);
            }
        }
    }

    fn signing_payload(
        id: Uuid,
        from: Uuid,
        to: Uuid,
        kind: &str,
        payload: &[u8],
        timestamp: chrono::DateTime<chrono::Utc>,
        nonce: &[u8; 16],
        sequence_number: u64,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(id.as_bytes());
        buf.extend_from_slice(from.as_bytes());
        buf.extend_from_slice(to.as_bytes());
        buf.extend_from_slice(kind.as_bytes());
        buf.extend_from_slice(payload);
        buf.extend_from_slice(timestamp.to_rfc3339().as_bytes());
        buf.extend_from_slice(nonce);
        buf.extend_from_slice(&sequence_number.to_be_bytes());
        buf
    }

    fn encrypt(key: &[u8; 32], nonce: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key");
        let aead_nonce = Nonce::from_slice(&nonce[..12]);
        cipher.encrypt(aead_nonce, plaintext).expect("encryption under a fresh nonce never fails")
    }

    fn decrypt(key: &[u8; 32], nonce: &[u8; 16], ciphertext: &[u8]) -> Option<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key).ok()?;
        let aead_nonce = Nonce::from_slice(&nonce[..12]);
        cipher.decrypt(aead_nonce, ciphertext).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Certificate, Session};
    use rand_core::OsRng;

    fn identity_with_cert(identities: &IdentityManager) -> (Uuid, SigningKey) {
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
        identities
            .register(Certificate { agent_id, public_key: verifying_key.to_bytes(), issued_at, expires_at, signature: signature.to_bytes().to_vec() })
            .unwrap();
        (agent_id, agent_key)
    }

    #[test]
    fn round_trips_unencrypted_message() {
        let identities = IdentityManager::new(Arc::new(EventBus::default()));
        let exchange = MessageExchange::new(Arc::new(EventBus::default()), 10, 60, 3, 60);
        let (from, from_key) = identity_with_cert(&identities);
        let to = Uuid::new_v4();

        let message = exchange.send(&from_key, None, from, to, "ping", b"hello".to_vec()).unwrap();
        let outcome = exchange.receive(&message, &identities, None, None, DEFAULT_TTL_SECS);
        assert!(outcome.valid);
        assert_eq!(outcome.payload.unwrap(), b"hello");
    }

    #[test]
    fn round_trips_encrypted_message_under_session() {
        let identities = IdentityManager::new(Arc::new(EventBus::default()));
        let exchange = MessageExchange::new(Arc::new(EventBus::default()), 10, 60, 3, 60);
        let (from, from_key) = identity_with_cert(&identities);
        let to = Uuid::new_v4();
        let session = Session { id: Uuid::new_v4(), agent_id: from, capabilities: Default::default(), encryption_key: [7; 32], mac_key: [9; 32], established_at: chrono::Utc::now() };

        let message = exchange.send(&from_key, Some(&session), from, to, "ping", b"secret".to_vec()).unwrap();
        assert_ne!(message.payload, b"secret");
        let outcome = exchange.receive(&message, &identities, Some(&session), None, DEFAULT_TTL_SECS);
        assert!(outcome.valid);
        assert_eq!(outcome.payload.unwrap(), b"secret");
    }

    #[test]
    fn session_sequence_numbers_increase_strictly_and_reject_replay() {
        let identities = IdentityManager::new(Arc::new(EventBus::default()));
        let exchange = MessageExchange::new(Arc::new(EventBus::default()), 10, 60, 3, 60);
        let (from, from_key) = identity_with_cert(&identities);
        let to = Uuid::new_v4();
        let session = Session { id: Uuid::new_v4(), agent_id: from, capabilities: Default::default(), encryption_key: [7; 32], mac_key: [9; 32], established_at: chrono::Utc::now() };

        let first = exchange.send(&from_key, Some(&session), from, to, "ping", b"one".to_vec()).unwrap();
        let second = exchange.send(&from_key, Some(&session), from, to, "ping", b"two".to_vec()).unwrap();
        assert!(second.sequence_number > first.sequence_number);

        assert!(exchange.receive(&second, &identities, Some(&session), None, DEFAULT_TTL_SECS).valid);
        // `first` carries a lower sequence number than what has already been
        // accepted for this session, so it must be rejected even though its
        // nonce and signature are both otherwise valid.
        assert!(!exchange.receive(&first, &identities, Some(&session), None, DEFAULT_TTL_SECS).valid);
    }

    #[test]
    fn replayed_nonce_is_rejected() {
        let identities = IdentityManager::new(Arc::new(EventBus::default()));
        let exchange = MessageExchange::new(Arc::new(EventBus::default()), 10, 60, 3, 60);
        let (from, from_key) = identity_with_cert(&identities);
        let to = Uuid::new_v4();

        let message = exchange.send(&from_key, None, from, to, "ping", b"hello".to_vec()).unwrap();
        assert!(exchange.receive(&message, &identities, None, None, DEFAULT_TTL_SECS).valid);
        assert!(!exchange.receive(&message, &identities, None, None, DEFAULT_TTL_SECS).valid);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let identities = IdentityManager::new(Arc::new(EventBus::default()));
        let exchange = MessageExchange::new(Arc::new(EventBus::default()), 10, 60, 3, 60);
        let (from, from_key) = identity_with_cert(&identities);
        let to = Uuid::new_v4();

        let mut message = exchange.send(&from_key, None, from, to, "ping", b"hello".to_vec()).unwrap();
        message.payload = b"tampered".to_vec();
        assert!(!exchange.receive(&message, &identities, None, None, DEFAULT_TTL_SECS).valid);
    }

    #[test]
    fn oversized_payload_is_flagged_but_not_necessarily_invalid() {
        let identities = IdentityManager::new(Arc::new(EventBus::default()));
        let exchange = MessageExchange::new(Arc::new(EventBus::default()), 10, 60, 3, 60);
        let (from, from_key) = identity_with_cert(&identities);
        let to = Uuid::new_v4();

        let oversized = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        let message = exchange.send(&from_key, None, from, to, "ping", oversized).unwrap();
        let outcome = exchange.receive(&message, &identities, None, None, DEFAULT_TTL_SECS);
        assert!(outcome.anomalies.contains(&MessageAnomaly::Oversized));
    }

    #[test]
    fn rate_limit_exhaustion_trips_breaker_eventually() {
        let identities = IdentityManager::new(Arc::new(EventBus::default()));
        let exchange = MessageExchange::new(Arc::new(EventBus::default()), 1, 60, 1, 60);
        let (from, from_key) = identity_with_cert(&identities);
        let to = Uuid::new_v4();

        assert!(exchange.send(&from_key, None, from, to, "ping", vec![]).is_ok());
        assert!(matches!(exchange.send(&from_key, None, from, to, "ping", vec![]), Err(SecurityError::RateLimited)));
        assert!(matches!(exchange.send(&from_key, None, from, to, "ping", vec![]), Err(SecurityError::CircuitOpen(_))));
    }
}
