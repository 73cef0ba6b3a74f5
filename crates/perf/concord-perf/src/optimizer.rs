//! The performance optimiser: owns batching, pipelining, speculation, and
//! the message cache, and adaptively tunes `batch_size`/`pipeline_depth`.

use crate::batcher::Batcher;
use crate::cache::MessageCache;
use crate::error::PerfError;
use crate::pipeline::Pipeline;
use crate::speculation::SpeculationTracker;
use crate::types::{Batch, PendingProposal, PerfConfig, PerfStats, Speculation, SpeculationOutcome};
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Sits between the consensus engine and transport, as laid out by the
/// component's data-flow placement.
pub struct PerfOptimizer {
    config: RwLock<PerfConfig>,
    batcher: Batcher,
    // `tokio::sync::Mutex` because `run_pipeline` awaits while holding it.
    pipeline: tokio::sync::Mutex<Pipeline>,
    speculation: SpeculationTracker,
    cache: Mutex<MessageCache>,
    stats: Mutex<PerfStats>,
}

impl PerfOptimizer {
    /// Construct an optimiser from its configuration.
    #[must_use]
    pub fn new(config: PerfConfig) -> Self {
        let pipeline = Pipeline::new(config.pipeline_depth, config.parallel_processing);
        let cache = MessageCache::new(config.cache_size);
        let batcher = Batcher::new(config.batch_size, config.batch_timeout_ms);
        Self {
            config: RwLock::new(config),
            batcher,
            pipeline: tokio::sync::Mutex::new(pipeline),
            speculation: SpeculationTracker::new(),
            cache: Mutex::new(cache),
            stats: Mutex::new(PerfStats::default()),
        }
    }

    /// Submit a proposal. If its digest is already cached, the cached
    /// result is returned immediately and the proposal never enters the
    /// batching queue. Otherwise it's enqueued, returning a flushed batch
    /// when this push fills one.
    pub fn submit(&self, proposal: PendingProposal) -> SubmitOutcome {
        if let Some(cached) = self.cache.lock().get(&proposal.digest) {
            self.stats.lock().cache_hits += 1;
            return SubmitOutcome::CacheHit(cached);
        }
        self.stats.lock().cache_misses += 1;
        self.stats.lock().proposals_batched += 1;

        match self.batcher.enqueue(proposal) {
            Some(batch) => {
                self.stats.lock().batches_flushed += 1;
                SubmitOutcome::Batched(batch)
            }
            None => SubmitOutcome::Queued,
        }
    }

    /// Cache `digest`'s result once a batch containing it commits.
    pub fn cache_result(&self, digest: [u8; 32], result: Vec<u8>) {
        self.cache.lock().put(digest, result);
    }

    /// Flush the queue if the oldest proposal has aged past `batch_timeout_ms`.
    pub fn flush_if_stale(&self) -> Option<Batch> {
        let batch = self.batcher.flush_if_stale();
        if batch.is_some() {
            self.stats.lock().batches_flushed += 1;
        }
        batch
    }

    /// Speculate on a proposal whose confidence clears the configured
    /// threshold.
    pub fn speculate(&self, speculation: Speculation) -> bool {
        let threshold = self.config.read().speculation_threshold;
        self.speculation.speculate(speculation, threshold)
    }

    /// Resolve a prior speculation against the committed result, updating
    /// stats accordingly.
    pub fn resolve_speculation(&self, proposal_id: Uuid, committed_result: &[u8]) -> Result<SpeculationOutcome, PerfError> {
        let outcome = self.speculation.resolve(proposal_id, committed_result)?;
        let mut stats = self.stats.lock();
        match outcome {
            SpeculationOutcome::Committed => stats.speculations_committed += 1,
            SpeculationOutcome::RolledBack => stats.speculations_rolled_back += 1,
        }
        Ok(outcome)
    }

    /// Run a batch through the pipeline stages.
    pub async fn run_pipeline<F, Fut>(&self, batch_id: Uuid, stage_fn: F) -> Vec<crate::types::PipelineStage>
    where
        F: FnMut(Uuid, crate::types::PipelineStage) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        // The pipeline is rebuilt by `record_measurement` when adaptive
        // tuning changes its depth.
        let pipeline = self.pipeline.lock().await;
        pipeline.run_stages(batch_id, stage_fn).await
    }

    /// Record a fresh latency/throughput measurement and nudge
    /// `batch_size`/`pipeline_depth` toward their targets if either
    /// deviates by more than 10%.
    pub fn record_measurement(&self, latency_ms: f64, throughput: f64) {
        {
            let mut stats = self.stats.lock();
            stats.measured_latency_ms = latency_ms;
            stats.measured_throughput = throughput;
        }

        let mut config = self.config.write();
        let latency_deviation = (latency_ms - config.target_latency_ms) / config.target_latency_ms;
        let throughput_deviation = (throughput - config.target_throughput) / config.target_throughput;
        let factor = config.adjustment_factor;

        if latency_deviation.abs() > 0.1 {
            // Latency too high: shrink batches so they fill (and flush) faster.
            let delta = (config.batch_size as f64 * factor * latency_deviation.signum()).round() as i64;
            config.batch_size = (config.batch_size as i64 - delta).max(1) as usize;
            debug!(new_batch_size = config.batch_size, latency_deviation, "adaptive tuning: batch size");
        }

        if throughput_deviation.abs() > 0.1 {
            // Throughput too low: widen the pipeline so more batches overlap.
            let delta = (config.pipeline_depth as f64 * factor * throughput_deviation.signum()).round() as i64;
            config.pipeline_depth = (config.pipeline_depth as i64 + delta).max(1) as usize;
            debug!(new_pipeline_depth = config.pipeline_depth, throughput_deviation, "adaptive tuning: pipeline depth");
        }

        let new_pipeline = Pipeline::new(config.pipeline_depth, config.parallel_processing);
        // Best-effort: if a batch is mid-pipeline, skip the swap this tick
        // rather than block; the next measurement will retry.
        if let Ok(mut guard) = self.pipeline.try_lock() {
            *guard = new_pipeline;
        }
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> PerfConfig {
        *self.config.read()
    }

    /// Current running counters.
    #[must_use]
    pub fn stats(&self) -> PerfStats {
        *self.stats.lock()
    }
}

/// What happened when a proposal was submitted.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// An identical proposal was already cached; the cached result was
    /// returned and the real path was short-circuited.
    CacheHit(Vec<u8>),
    /// The proposal filled the queue and produced a batch.
    Batched(Batch),
    /// The proposal was enqueued but did not yet fill a batch.
    Queued,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(digest: u8) -> PendingProposal {
        PendingProposal { id: Uuid::new_v4(), digest: [digest; 32], payload: vec![], queued_at: chrono::Utc::now() }
    }

    #[test]
    fn cache_hit_short_circuits_submission() {
        let optimizer = PerfOptimizer::new(PerfConfig::default());
        optimizer.cache_result([7; 32], vec![42]);
        match optimizer.submit(proposal(7)) {
            SubmitOutcome::CacheHit(result) => assert_eq!(result, vec![42]),
            other => panic!("expected cache hit, got {other:?}"),
        }
        assert_eq!(optimizer.stats().cache_hits, 1);
    }

    #[test]
    fn queue_flushes_into_a_batch_at_batch_size() {
        let mut config = PerfConfig::default();
        config.batch_size = 2;
        let optimizer = PerfOptimizer::new(config);
        assert!(matches!(optimizer.submit(proposal(1)), SubmitOutcome::Queued));
        assert!(matches!(optimizer.submit(proposal(2)), SubmitOutcome::Batched(_)));
        assert_eq!(optimizer.stats().batches_flushed, 1);
    }

    #[test]
    fn high_latency_shrinks_batch_size() {
        let mut config = PerfConfig::default();
        config.batch_size = 100;
        config.target_latency_ms = 100.0;
        config.adjustment_factor = 0.2;
        let optimizer = PerfOptimizer::new(config);
        optimizer.record_measurement(200.0, 1000.0); // 100% over target latency
        assert!(optimizer.config().batch_size < 100);
    }

    #[test]
    fn low_throughput_widens_pipeline_depth() {
        let mut config = PerfConfig::default();
        config.pipeline_depth = 4;
        config.target_throughput = 1000.0;
        config.adjustment_factor = 0.5;
        let optimizer = PerfOptimizer::new(config);
        optimizer.record_measurement(100.0, 100.0); // way under target throughput
        assert!(optimizer.config().pipeline_depth > 4);
    }
}
