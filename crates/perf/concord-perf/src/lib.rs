//! Performance optimiser sitting between the consensus engine and
//! transport: proposal batching, cross-batch pipelining, speculative
//! execution, and a bounded message cache, with adaptive threshold tuning.

pub mod batcher;
pub mod cache;
pub mod error;
pub mod optimizer;
pub mod pipeline;
pub mod speculation;
pub mod types;

pub use batcher::Batcher;
pub use cache::MessageCache;
pub use error::PerfError;
pub use optimizer::{PerfOptimizer, SubmitOutcome};
pub use pipeline::Pipeline;
pub use speculation::SpeculationTracker;
pub use types::{Batch, PendingProposal, PerfConfig, PerfStats, PipelineStage, Speculation, SpeculationOutcome};
