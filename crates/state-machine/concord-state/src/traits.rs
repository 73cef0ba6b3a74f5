//! Pluggable persistence and replication hooks.

use crate::types::{Snapshot, StateOperation};
use async_trait::async_trait;
use concord_core::ConcordResult;
use uuid::Uuid;

/// Durable storage for operations and snapshots. The state machine does not
/// persist itself; this is the narrow interface a caller's storage backend
/// implements.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Append an applied operation to the durable log.
    async fn append_operation(&self, op: &StateOperation) -> ConcordResult<()>;

    /// Persist a snapshot.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> ConcordResult<()>;

    /// Load a previously persisted snapshot by id.
    async fn load_snapshot(&self, id: Uuid) -> ConcordResult<Option<Snapshot>>;
}

/// Pushes applied operations to a replica. Implementations own the
/// transport; a push failure is recorded by the caller but never blocks the
/// local apply path.
#[async_trait]
pub trait Replicator: Send + Sync {
    /// Send `op` to `replica`.
    async fn replicate(&self, replica: Uuid, op: &StateOperation) -> ConcordResult<()>;
}
