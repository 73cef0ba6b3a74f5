//! Canonical byte encoding used for signing and verifying PBFT messages.
//!
//! Mirrors the upstream source's private `VoteForSigning` struct: a
//! dedicated type whose field order is exactly the order the signature is
//! defined over, serialised with `serde_json` so every verifier reproduces
//! the identical bytes regardless of in-memory field order.

use crate::types::{AgentId, PbftMessage, SeqNumber, ViewNumber};
use serde::Serialize;

#[derive(Serialize)]
struct PbftMessageForSigning<'a> {
    phase: &'a crate::types::PbftPhase,
    view: ViewNumber,
    seq: SeqNumber,
    digest: [u8; 32],
    payload: &'a Option<Vec<u8>>,
    timestamp: chrono::DateTime<chrono::Utc>,
    sender_id: AgentId,
}

/// Produce the canonical byte string a [`PbftMessage`]'s signature is
/// computed over (everything except the signature itself).
#[must_use]
pub fn canonical_bytes(message: &PbftMessage) -> Vec<u8> {
    let for_signing = PbftMessageForSigning {
        phase: &message.phase,
        view: message.view,
        seq: message.seq,
        digest: message.digest,
        payload: &message.payload,
        timestamp: message.timestamp,
        sender_id: message.sender_id,
    };
    serde_json::to_vec(&for_signing).expect("canonical encoding never fails")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PbftPhase;

    fn sample() -> PbftMessage {
        PbftMessage {
            phase: PbftPhase::Prepare,
            view: ViewNumber(1),
            seq: 7,
            digest: [9u8; 32],
            payload: None,
            timestamp: chrono::Utc::now(),
            signature: Vec::new(),
            sender_id: AgentId::new(),
        }
    }

    #[test]
    fn identical_messages_canonicalise_identically() {
        let msg = sample();
        assert_eq!(canonical_bytes(&msg), canonical_bytes(&msg));
    }

    #[test]
    fn flipping_a_field_changes_the_encoding() {
        let mut msg = sample();
        let original = canonical_bytes(&msg);
        msg.seq += 1;
        assert_ne!(original, canonical_bytes(&msg));
    }
}
