//! Core data types for the replicated state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// The four operation kinds an executor may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Fails if the target already exists.
    Create,
    /// Fails if the target is missing; merges maps, replaces otherwise.
    Update,
    /// Fails if the target is missing.
    Delete,
    /// Invokes a named function from the `execute` whitelist.
    Execute,
}

/// The enumerated whitelist of functions `execute` may invoke. Anything
/// outside this set is rejected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecuteFn {
    /// Adds `data` (must be numeric) to the current numeric value.
    Increment,
    /// Appends `data` to the current array value.
    Append,
    /// Shallow-merges `data` (must be an object) into the current object value.
    Merge,
}

/// `{id, kind, target, data, timestamp, seq, dependencies, signature, executorId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateOperation {
    /// Unique operation id.
    pub id: Uuid,
    /// Which apply semantics to use.
    pub kind: OperationKind,
    /// The key in the state map this operation addresses.
    pub target: String,
    /// For `execute`, must be a `{"fn": ExecuteFn, "arg": Value}` object.
    /// For `create`/`update`, the new value. Unused for `delete`.
    pub data: Value,
    /// Submission timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Strictly monotonic per executor.
    pub seq: u64,
    /// Operation ids that must already be applied before this one is eligible.
    pub dependencies: Vec<Uuid>,
    /// Signature over the canonical encoding (verified by the caller before
    /// the operation reaches this crate; carried here for audit/replication).
    pub signature: Vec<u8>,
    /// The agent that submitted this operation.
    pub executor_id: Uuid,
}

impl StateOperation {
    /// Parse `data` as an `{"fn", "arg"}` execute payload.
    pub(crate) fn execute_payload(&self) -> Option<(ExecuteFn, Value)> {
        let func = serde_json::from_value(self.data.get("fn")?.clone()).ok()?;
        let arg = self.data.get("arg")?.clone();
        Some((func, arg))
    }
}

/// `{id, seq, state, timestamp, hash, trailingOps}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot id.
    pub id: Uuid,
    /// Sequence number of the last op folded into `state`.
    pub seq: u64,
    /// Full state map at the time of the snapshot.
    pub state: HashMap<String, Value>,
    /// Capture timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// SHA-256 hash of the serialized `state`, for integrity checking.
    pub hash: [u8; 32],
    /// Ops applied strictly after `seq`, retained so `restore` can replay
    /// forward of an older snapshot if a later one is evicted.
    pub trailing_ops: Vec<StateOperation>,
}

/// A rollback operation generated when a losing side of a conflict must be
/// undone: type-inverted using the stored prior value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOperation {
    /// The operation being rolled back.
    pub original_op_id: Uuid,
    /// The target being restored.
    pub target: String,
    /// The value to restore, or `None` for a best-effort delete when no
    /// prior value was known.
    pub restore_value: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_payload_parses_increment() {
        let op = StateOperation {
            id: Uuid::new_v4(),
            kind: OperationKind::Execute,
            target: "counter".into(),
            data: serde_json::json!({"fn": "increment", "arg": 3}),
            timestamp: chrono::Utc::now(),
            seq: 1,
            dependencies: vec![],
            signature: vec![],
            executor_id: Uuid::new_v4(),
        };
        let (func, arg) = op.execute_payload().unwrap();
        assert_eq!(func, ExecuteFn::Increment);
        assert_eq!(arg, serde_json::json!(3));
    }
}
