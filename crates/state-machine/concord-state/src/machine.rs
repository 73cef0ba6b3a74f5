//! The replicated state machine: deterministic apply, conflict resolution,
//! snapshotting, and peer replication.

use crate::conflict::{conflicts, resolve};
use crate::error::StateError;
use crate::traits::Replicator;
use crate::types::{ExecuteFn, OperationKind, Snapshot, StateOperation};
use crate::vector_clock::VectorClock;
use concord_core::{ClusterConfig, ConcordEvent, ConcordResult, EventBus};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The current key/value state plus bookkeeping needed for conflict
/// detection, dependency resolution, and snapshotting.
pub struct StateMachine<R> {
    config: ClusterConfig,
    replicator: Arc<R>,
    events: Arc<EventBus>,

    state: DashMap<String, Value>,
    applied: DashSet<Uuid>,
    pending: DashMap<Uuid, StateOperation>,
    vector_clocks: DashMap<Uuid, VectorClock>,
    trust_scores: DashMap<Uuid, f64>,

    applied_since_snapshot: AtomicU64,
    last_seq: AtomicU64,
    snapshots: RwLock<VecDeque<Snapshot>>,
}

impl<R> StateMachine<R>
where
    R: Replicator,
{
    /// Construct an empty state machine.
    pub fn new(config: ClusterConfig, replicator: Arc<R>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            replicator,
            events,
            state: DashMap::new(),
            applied: DashSet::new(),
            pending: DashMap::new(),
            vector_clocks: DashMap::new(),
            trust_scores: DashMap::new(),
            applied_since_snapshot: AtomicU64::new(0),
            last_seq: AtomicU64::new(0),
            snapshots: RwLock::new(VecDeque::new()),
        }
    }

    /// Record a trust score used by the `consensus-based` conflict policy.
    pub fn set_trust_score(&self, executor: Uuid, score: f64) {
        self.trust_scores.insert(executor, score);
    }

    /// Read the current value for `target`.
    #[must_use]
    pub fn get(&self, target: &str) -> Option<Value> {
        self.state.get(target).map(|v| v.clone())
    }

    /// Whether every dependency of `op` has already been applied.
    fn is_eligible(&self, op: &StateOperation) -> bool {
        op.dependencies.iter().all(|dep| self.applied.contains(dep))
    }

    /// Apply one operation. If its dependencies are not all satisfied yet
    /// it is parked and `Err(StateError::Parked)` is returned; call
    /// [`Self::retry_pending`] once the missing dependency lands.
    pub async fn apply(&self, op: StateOperation) -> ConcordResult<()> {
        if self.applied.contains(&op.id) {
            return Ok(()); // already applied, idempotent re-delivery
        }
        if !self.is_eligible(&op) {
            self.pending.insert(op.id, op.clone());
            return Err(StateError::Parked(op.id).into());
        }
        self.apply_eligible(op).await?;
        self.retry_pending().await
    }

    /// Re-attempt every parked operation whose dependencies may now be
    /// satisfied. Ops still blocked remain parked.
    pub async fn retry_pending(&self) -> ConcordResult<()> {
        loop {
            let ready: Vec<StateOperation> = self
                .pending
                .iter()
                .filter(|entry| self.is_eligible(entry.value()))
                .map(|entry| entry.value().clone())
                .collect();
            if ready.is_empty() {
                return Ok(());
            }
            for op in ready {
                self.pending.remove(&op.id);
                self.apply_eligible(op).await?;
            }
        }
    }

    /// Apply a batch of operations that may concurrently target the same
    /// keys, resolving conflicts per the configured policy before applying
    /// the winner of each conflicting pair.
    pub async fn apply_concurrent(&self, ops: Vec<StateOperation>) -> ConcordResult<()> {
        let mut by_target: HashMap<String, Vec<StateOperation>> = HashMap::new();
        for op in ops {
            by_target.entry(op.target.clone()).or_default().push(op);
        }

        for (_target, mut group) in by_target {
            group.sort_by_key(|op| op.seq);
            let mut current = group.remove(0);
            for next in group {
                if conflicts(current.kind, next.kind) {
                    let prior = self.get(&current.target);
                    let trust_scores = &self.trust_scores;
                    let clocks = &self.vector_clocks;
                    let resolution = resolve(
                        self.config.conflict_resolution,
                        current.clone(),
                        next.clone(),
                        prior,
                        |op| trust_scores.get(&op.executor_id).map(|v| *v).unwrap_or(0.5),
                        |op| clocks.get(&op.id).map(|v| v.clone()).unwrap_or_default(),
                    );
                    warn!(target = %resolution.loser.target, loser = %resolution.loser.id, "state op conflict resolved");
                    self.events.publish(ConcordEvent::Threat {
                        agent_id: Some(resolution.loser.executor_id),
                        reason: "state-conflict".into(),
                    });
                    current = resolution.winner;
                } else {
                    self.apply_eligible(current).await?;
                    current = next;
                }
            }
            self.apply_eligible(current).await?;
        }
        Ok(())
    }

    async fn apply_eligible(&self, op: StateOperation) -> ConcordResult<()> {
        self.apply_semantics(&op)?;
        self.applied.insert(op.id);
        let mut clock = self.vector_clocks.get(&op.executor_id).map(|v| v.clone()).unwrap_or_default();
        clock.increment(op.executor_id);
        self.vector_clocks.insert(op.id, clock);
        self.last_seq.store(op.seq, Ordering::SeqCst);
        for snapshot in self.snapshots.write().iter_mut() {
            if op.seq > snapshot.seq {
                snapshot.trailing_ops.push(op.clone());
            }
        }

        self.replicate(&op).await;

        if self.applied_since_snapshot.fetch_add(1, Ordering::SeqCst) + 1 >= self.config.checkpoint_interval {
            self.applied_since_snapshot.store(0, Ordering::SeqCst);
            self.take_snapshot();
        }
        debug!(target = %op.target, seq = op.seq, "state operation applied");
        Ok(())
    }

    fn apply_semantics(&self, op: &StateOperation) -> ConcordResult<()> {
        match op.kind {
            OperationKind::Create => {
                if self.state.contains_key(&op.target) {
                    return Err(StateError::TargetExists(op.target.clone()).into());
                }
                self.state.insert(op.target.clone(), op.data.clone());
            }
            OperationKind::Update => {
                let mut entry = self
                    .state
                    .get_mut(&op.target)
                    .ok_or_else(|| StateError::TargetMissing(op.target.clone()))?;
                match (&mut *entry, &op.data) {
                    (Value::Object(current), Value::Object(incoming)) => {
                        for (k, v) in incoming {
                            current.insert(k.clone(), v.clone());
                        }
                    }
                    (slot, _) => *slot = op.data.clone(),
                }
            }
            OperationKind::Delete => {
                self.state.remove(&op.target).ok_or_else(|| StateError::TargetMissing(op.target.clone()))?;
            }
            OperationKind::Execute => {
                let (func, arg) = op
                    .execute_payload()
                    .ok_or_else(|| StateError::InvalidExecutePayload(op.target.clone()))?;
                self.apply_execute(&op.target, func, arg)?;
            }
        }
        Ok(())
    }

    fn apply_execute(&self, target: &str, func: ExecuteFn, arg: Value) -> ConcordResult<()> {
        let mut entry = self
            .state
            .get_mut(target)
            .ok_or_else(|| StateError::TargetMissing(target.to_string()))?;
        match func {
            ExecuteFn::Increment => {
                let current = entry.as_f64().ok_or_else(|| StateError::InvalidExecutePayload(target.to_string()))?;
                let delta = arg.as_f64().ok_or_else(|| StateError::InvalidExecutePayload(target.to_string()))?;
                *entry = serde_json::json!(current + delta);
            }
            ExecuteFn::Append => {
                let array = entry.as_array_mut().ok_or_else(|| StateError::InvalidExecutePayload(target.to_string()))?;
                array.push(arg);
            }
            ExecuteFn::Merge => {
                let (Value::Object(current), Value::Object(incoming)) = (&mut *entry, &arg) else {
                    return Err(StateError::InvalidExecutePayload(target.to_string()).into());
                };
                for (k, v) in incoming {
                    current.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }

    async fn replicate(&self, op: &StateOperation) {
        let peers = self.replication_peers();
        for peer in peers {
            if let Err(err) = self.replicator.replicate(peer, op).await {
                warn!(%peer, %err, "replication push failed, continuing locally");
            }
        }
    }

    /// Peers to replicate to, ordered by trust (highest first), capped at
    /// `replicationFactor`. Trust-ordering only covers peers we have a
    /// score for; callers typically seed scores via [`Self::set_trust_score`].
    fn replication_peers(&self) -> Vec<Uuid> {
        let mut peers: Vec<(Uuid, f64)> =
            self.trust_scores.iter().map(|entry| (*entry.key(), *entry.value())).collect();
        peers.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        peers.into_iter().take(self.config.replication_factor).map(|(id, _)| id).collect()
    }

    /// Capture `{seq, state, trailing ops}` as a new snapshot, evicting the
    /// oldest retained snapshot if over `maxRetainedSnapshots`.
    pub fn take_snapshot(&self) -> Snapshot {
        let state: HashMap<String, Value> = self.state.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let seq = self.last_seq.load(Ordering::SeqCst);
        let hash = Self::hash_state(&state);
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            seq,
            state,
            timestamp: chrono::Utc::now(),
            hash,
            trailing_ops: Vec::new(),
        };

        let mut snapshots = self.snapshots.write();
        snapshots.push_back(snapshot.clone());
        while snapshots.len() > self.config.max_retained_snapshots {
            snapshots.pop_front();
        }
        info!(seq, snapshot_id = %snapshot.id, "snapshot captured");
        self.events.publish(ConcordEvent::SnapshotCreated { snapshot_id: snapshot.id, seq });
        snapshot
    }

    fn hash_state(state: &HashMap<String, Value>) -> [u8; 32] {
        let mut entries: Vec<(&String, &Value)> = state.iter().collect();
        entries.sort_by_key(|(k, _)| k.as_str());
        let canonical = serde_json::to_vec(&entries).expect("state values are always serializable");
        Sha256::digest(&canonical).into()
    }

    /// Replace current state with the snapshot `snapshot_id` (searched among
    /// retained snapshots) and replay its trailing ops in `seq` order.
    pub fn restore(&self, snapshot_id: Uuid) -> ConcordResult<()> {
        let snapshot = {
            let snapshots = self.snapshots.read();
            snapshots.iter().find(|s| s.id == snapshot_id).cloned()
        }
        .ok_or(StateError::SnapshotNotFound(snapshot_id))?;

        if Self::hash_state(&snapshot.state) != snapshot.hash {
            return Err(StateError::Conflict("snapshot integrity check failed".to_string()).into());
        }

        self.state.clear();
        for (target, value) in &snapshot.state {
            self.state.insert(target.clone(), value.clone());
        }
        self.last_seq.store(snapshot.seq, Ordering::SeqCst);

        let mut trailing: Vec<&StateOperation> = snapshot.trailing_ops.iter().filter(|op| op.seq > snapshot.seq).collect();
        trailing.sort_by_key(|op| op.seq);
        for op in trailing {
            self.apply_semantics(op)?;
            self.last_seq.store(op.seq, Ordering::SeqCst);
        }
        info!(seq = snapshot.seq, snapshot_id = %snapshot_id, "state restored from snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopReplicator;
    #[async_trait]
    impl Replicator for NoopReplicator {
        async fn replicate(&self, _replica: Uuid, _op: &StateOperation) -> ConcordResult<()> {
            Ok(())
        }
    }

    fn make_machine() -> StateMachine<NoopReplicator> {
        StateMachine::new(ClusterConfig::default(), Arc::new(NoopReplicator), Arc::new(EventBus::default()))
    }

    fn op(kind: OperationKind, target: &str, data: Value, seq: u64) -> StateOperation {
        StateOperation {
            id: Uuid::new_v4(),
            kind,
            target: target.to_string(),
            data,
            timestamp: chrono::Utc::now(),
            seq,
            dependencies: vec![],
            signature: vec![],
            executor_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn create_then_update_then_delete() {
        let machine = make_machine();
        machine.apply(op(OperationKind::Create, "x", serde_json::json!(1), 1)).await.unwrap();
        assert_eq!(machine.get("x"), Some(serde_json::json!(1)));

        machine.apply(op(OperationKind::Update, "x", serde_json::json!(2), 2)).await.unwrap();
        assert_eq!(machine.get("x"), Some(serde_json::json!(2)));

        machine.apply(op(OperationKind::Delete, "x", Value::Null, 3)).await.unwrap();
        assert_eq!(machine.get("x"), None);
    }

    #[tokio::test]
    async fn create_on_existing_target_fails() {
        let machine = make_machine();
        machine.apply(op(OperationKind::Create, "x", serde_json::json!(1), 1)).await.unwrap();
        let result = machine.apply(op(OperationKind::Create, "x", serde_json::json!(2), 2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn operation_with_unmet_dependency_is_parked_then_resolves() {
        let machine = make_machine();
        let dep = op(OperationKind::Create, "a", serde_json::json!(1), 1);
        let mut blocked = op(OperationKind::Create, "b", serde_json::json!(2), 2);
        blocked.dependencies = vec![dep.id];

        let result = machine.apply(blocked.clone()).await;
        assert!(result.is_err());
        assert_eq!(machine.get("b"), None);

        machine.apply(dep).await.unwrap();
        assert_eq!(machine.get("b"), Some(serde_json::json!(2)));
    }

    #[tokio::test]
    async fn execute_increment_accumulates() {
        let machine = make_machine();
        machine.apply(op(OperationKind::Create, "counter", serde_json::json!(10), 1)).await.unwrap();
        machine
            .apply(op(OperationKind::Execute, "counter", serde_json::json!({"fn": "increment", "arg": 5}), 2))
            .await
            .unwrap();
        assert_eq!(machine.get("counter"), Some(serde_json::json!(15.0)));
    }

    #[tokio::test]
    async fn restore_replays_trailing_ops_forward_from_an_older_snapshot() {
        let machine = make_machine();
        machine.apply(op(OperationKind::Create, "x", serde_json::json!(1), 1)).await.unwrap();
        let snapshot = machine.take_snapshot();
        machine.apply(op(OperationKind::Update, "x", serde_json::json!(2), 2)).await.unwrap();
        machine.apply(op(OperationKind::Update, "x", serde_json::json!(3), 3)).await.unwrap();
        assert_eq!(machine.get("x"), Some(serde_json::json!(3)));

        // Simulate a replica whose live state diverged; restoring from the
        // retained snapshot must replay every op applied since to land back
        // on the current value, not roll back to the snapshot's own state.
        machine.state.insert("x".to_string(), serde_json::json!("corrupted"));
        machine.restore(snapshot.id).unwrap();
        assert_eq!(machine.get("x"), Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn concurrent_conflicting_updates_resolve_to_one_winner() {
        let machine = make_machine();
        machine.apply(op(OperationKind::Create, "x", serde_json::json!(0), 1)).await.unwrap();

        let a = op(OperationKind::Update, "x", serde_json::json!("a"), 2);
        let mut b = op(OperationKind::Update, "x", serde_json::json!("b"), 3);
        b.timestamp = a.timestamp + chrono::Duration::milliseconds(50);

        machine.apply_concurrent(vec![a, b.clone()]).await.unwrap();
        assert_eq!(machine.get("x"), Some(serde_json::json!("b")));
    }
}
