//! Proposal batching: accumulate until `batch_size` or `batch_timeout_ms`.

use crate::error::PerfError;
use crate::types::{Batch, PendingProposal};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// A single-queue batcher. Not agent-sharded: one instance per consensus
/// round key.
pub struct Batcher {
    batch_size: usize,
    batch_timeout_ms: u64,
    queue: Mutex<Vec<PendingProposal>>,
}

impl Batcher {
    /// Construct a batcher flushing at `batch_size` proposals or after
    /// `batch_timeout_ms` milliseconds since the oldest queued proposal.
    #[must_use]
    pub fn new(batch_size: usize, batch_timeout_ms: u64) -> Self {
        Self { batch_size, batch_timeout_ms, queue: Mutex::new(Vec::new()) }
    }

    /// Enqueue a proposal, returning a ready batch if this push filled it.
    pub fn enqueue(&self, proposal: PendingProposal) -> Option<Batch> {
        let mut queue = self.queue.lock();
        queue.push(proposal);
        if queue.len() >= self.batch_size {
            Some(Self::build_batch(&mut queue))
        } else {
            None
        }
    }

    /// Flush whatever is queued if the oldest entry has waited longer than
    /// `batch_timeout_ms`. Called on a timer tick by the owning optimiser.
    pub fn flush_if_stale(&self) -> Option<Batch> {
        let mut queue = self.queue.lock();
        let oldest = queue.first()?;
        let age_ms = (chrono::Utc::now() - oldest.queued_at).num_milliseconds();
        if age_ms >= self.batch_timeout_ms as i64 {
            Some(Self::build_batch(&mut queue))
        } else {
            None
        }
    }

    /// Force a flush of whatever is queued, regardless of size or age.
    pub fn flush_now(&self) -> Result<Batch, PerfError> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            return Err(PerfError::EmptyQueue);
        }
        Ok(Self::build_batch(&mut queue))
    }

    fn build_batch(queue: &mut Vec<PendingProposal>) -> Batch {
        let drained: Vec<PendingProposal> = queue.drain(..).collect();
        let mut hasher = Sha256::new();
        for proposal in &drained {
            hasher.update(proposal.digest);
        }
        let combined_hash: [u8; 32] = hasher.finalize().into();
        Batch {
            proposal_ids: drained.into_iter().map(|p| p.id).collect(),
            combined_hash,
            flushed_at: chrono::Utc::now(),
        }
    }

    /// Current queue depth.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn proposal(digest: u8) -> PendingProposal {
        PendingProposal { id: Uuid::new_v4(), digest: [digest; 32], payload: vec![], queued_at: chrono::Utc::now() }
    }

    #[test]
    fn flushes_automatically_at_batch_size() {
        let batcher = Batcher::new(2, 10_000);
        assert!(batcher.enqueue(proposal(1)).is_none());
        let batch = batcher.enqueue(proposal(2));
        assert!(batch.is_some());
        assert_eq!(batch.unwrap().proposal_ids.len(), 2);
        assert_eq!(batcher.pending_len(), 0);
    }

    #[test]
    fn forced_flush_drains_partial_queue() {
        let batcher = Batcher::new(10, 10_000);
        batcher.enqueue(proposal(1));
        let batch = batcher.flush_now().unwrap();
        assert_eq!(batch.proposal_ids.len(), 1);
        assert!(batcher.flush_now().is_err());
    }
}
