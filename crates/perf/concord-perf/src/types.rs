//! Shared types for the performance optimiser.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A proposal accepted into the batching queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingProposal {
    /// Proposal identifier.
    pub id: Uuid,
    /// Content digest, used for cache keying and dedup.
    pub digest: [u8; 32],
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Queued at.
    pub queued_at: chrono::DateTime<chrono::Utc>,
}

/// A flushed batch: every proposal id it carries plus a combined hash over
/// their digests in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Proposal ids carried, in flush order.
    pub proposal_ids: Vec<Uuid>,
    /// SHA-256 over the concatenation of each proposal's digest.
    pub combined_hash: [u8; 32],
    /// Flush timestamp.
    pub flushed_at: chrono::DateTime<chrono::Utc>,
}

/// A pipeline stage for a batch moving through `pre-prepare -> prepare -> commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Batch proposed.
    PrePrepare,
    /// Batch endorsed by the quorum.
    Prepare,
    /// Batch committed.
    Commit,
}

/// Outcome of a proposal's speculative execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpeculationOutcome {
    /// Speculative result matched the final commit; kept.
    Committed,
    /// Speculative result diverged from the final commit; discarded.
    RolledBack,
}

/// A speculative execution record, never exposed to readers before the
/// real commit resolves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speculation {
    /// The proposal being speculated on.
    pub proposal_id: Uuid,
    /// Confidence in `[0, 1]` that the speculation will match the real commit.
    pub confidence: f64,
    /// Speculative result payload.
    pub result: Vec<u8>,
}

/// Tunable knobs, adjusted at runtime by the adaptive-threshold loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerfConfig {
    /// Proposals per batch before an automatic flush.
    pub batch_size: usize,
    /// Max wait before a partial batch is flushed anyway, in milliseconds.
    pub batch_timeout_ms: u64,
    /// Max concurrent in-flight batches when `parallel_processing` is set.
    pub pipeline_depth: usize,
    /// Whether pipeline stages may overlap across batches.
    pub parallel_processing: bool,
    /// Confidence above which a proposal is spontaneously speculated on.
    pub speculation_threshold: f64,
    /// Message cache capacity.
    pub cache_size: usize,
    /// Target latency, milliseconds, for adaptive tuning.
    pub target_latency_ms: f64,
    /// Target throughput, proposals/sec, for adaptive tuning.
    pub target_throughput: f64,
    /// Fractional nudge applied to `batch_size`/`pipeline_depth` when a
    /// measured metric deviates from target by more than 10%.
    pub adjustment_factor: f64,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout_ms: 50,
            pipeline_depth: 4,
            parallel_processing: true,
            speculation_threshold: 0.8,
            cache_size: 10_000,
            target_latency_ms: 100.0,
            target_throughput: 1_000.0,
            adjustment_factor: 0.1,
        }
    }
}

/// Running counters surfaced by [`crate::optimizer::PerfOptimizer::stats`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerfStats {
    /// Total proposals batched.
    pub proposals_batched: u64,
    /// Total batches flushed.
    pub batches_flushed: u64,
    /// Cache hits that short-circuited the real path.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
    /// Speculations that matched the real commit.
    pub speculations_committed: u64,
    /// Speculations that were rolled back.
    pub speculations_rolled_back: u64,
    /// Most recent measured end-to-end latency, milliseconds.
    pub measured_latency_ms: f64,
    /// Most recent measured throughput, proposals/sec.
    pub measured_throughput: f64,
}
