//! Bridges the consensus engine's narrow signing/verification needs onto
//! the security manager's root keypair and registered agent certificates.

use concord_consensus::traits::ConsensusCrypto;
use concord_consensus::types::AgentId;
use concord_security::SecurityManager;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::sync::Arc;

/// Signs consensus messages under the façade's root key and verifies them
/// against whichever agent's certificate the security manager has on file.
pub struct CryptoBridge {
    security: Arc<SecurityManager>,
}

impl CryptoBridge {
    /// Wrap a security manager as a consensus crypto provider.
    #[must_use]
    pub fn new(security: Arc<SecurityManager>) -> Self {
        Self { security }
    }
}

impl ConsensusCrypto for CryptoBridge {
    fn sign(&self, bytes: &[u8]) -> Vec<u8> {
        self.security.sign_root(bytes).to_vec()
    }

    fn verify(&self, signer: AgentId, bytes: &[u8], signature: &[u8]) -> bool {
        let Some(public_key) = self.security.verifying_key_for(signer.0) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
            return false;
        };
        let Ok(signature_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let signature = Signature::from_bytes(&signature_bytes);
        verifying_key.verify(bytes, &signature).is_ok()
    }
}
