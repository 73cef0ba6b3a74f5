//! Pipelined batch processing: `pre-prepare -> prepare -> commit` stages
//! run sequentially, or in parallel up to a configured depth.

use crate::types::PipelineStage;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Bounds how many batches may have in-flight stages concurrently.
pub struct Pipeline {
    parallel_processing: bool,
    depth: Arc<Semaphore>,
}

impl Pipeline {
    /// Construct a pipeline with the given max concurrent depth. Depth is
    /// ignored (effectively 1) when `parallel_processing` is false.
    #[must_use]
    pub fn new(pipeline_depth: usize, parallel_processing: bool) -> Self {
        let depth = if parallel_processing { pipeline_depth.max(1) } else { 1 };
        Self { parallel_processing, depth: Arc::new(Semaphore::new(depth)) }
    }

    /// Run `stage_fn` for each of `pre-prepare`, `prepare`, `commit` against
    /// `batch_id`, acquiring a pipeline slot for the duration of each stage.
    /// When `parallel_processing` is disabled, stages for a single batch
    /// still run strictly in order; only the *across-batch* concurrency
    /// changes, governed by the semaphore permit held across the whole call.
    pub async fn run_stages<F, Fut>(&self, batch_id: Uuid, mut stage_fn: F) -> Vec<PipelineStage>
    where
        F: FnMut(Uuid, PipelineStage) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let _permit = self.depth.acquire().await.expect("semaphore never closed");
        let mut completed = Vec::with_capacity(3);
        for stage in [PipelineStage::PrePrepare, PipelineStage::Prepare, PipelineStage::Commit] {
            stage_fn(batch_id, stage).await;
            completed.push(stage);
        }
        completed
    }

    /// Current available concurrency slots.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.depth.available_permits()
    }

    /// Whether cross-batch pipelining is enabled.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.parallel_processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn stages_run_in_order() {
        let pipeline = Pipeline::new(2, true);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let order_clone = order.clone();
        let completed = pipeline
            .run_stages(Uuid::new_v4(), move |_, stage| {
                let order = order_clone.clone();
                async move {
                    order.lock().push(stage);
                }
            })
            .await;
        assert_eq!(completed, vec![PipelineStage::PrePrepare, PipelineStage::Prepare, PipelineStage::Commit]);
        assert_eq!(*order.lock(), completed);
    }

    #[tokio::test]
    async fn depth_bounds_concurrent_batches() {
        let pipeline = Arc::new(Pipeline::new(1, true));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pipeline = pipeline.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                pipeline
                    .run_stages(Uuid::new_v4(), move |_, _| {
                        let active = active.clone();
                        let max_seen = max_seen.clone();
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        }
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
