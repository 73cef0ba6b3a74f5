//! Conflict detection matrix and the three pluggable resolution policies.

use crate::types::{OperationKind, RollbackOperation, StateOperation};
use crate::vector_clock::VectorClock;
use concord_core::ConflictResolution;
use serde_json::Value;

/// Whether two operations on the same target conflict, per the fixed
/// matrix: create-create, update-update, update-delete, delete-create, and
/// execute-execute conflict; every other pairing does not.
#[must_use]
pub fn conflicts(a: OperationKind, b: OperationKind) -> bool {
    use OperationKind::{Create, Delete, Execute, Update};
    matches!(
        (a, b),
        (Create, Create) | (Update, Update) | (Update, Delete) | (Delete, Update) | (Delete, Create)
            | (Create, Delete) | (Execute, Execute)
    )
}

/// The outcome of resolving one conflicting pair: which operation wins, and
/// a rollback for the operation that loses.
pub struct Resolution {
    /// The operation to actually apply.
    pub winner: StateOperation,
    /// The operation that lost and must be rolled back.
    pub loser: StateOperation,
    /// How to undo the loser, if it had already been speculatively applied.
    pub rollback: RollbackOperation,
}

/// Resolve a conflicting pair `(a, b)` under `policy`.
///
/// `prior_value` is the target's value before either operation, used to
/// build a type-inverted rollback for whichever operation loses.
/// `trust_of` supplies the executor's trust score for `consensus-based`;
/// `clock_of` supplies each operation's vector clock for `vector-clock`.
pub fn resolve(
    policy: ConflictResolution,
    a: StateOperation,
    b: StateOperation,
    prior_value: Option<Value>,
    trust_of: impl Fn(&StateOperation) -> f64,
    clock_of: impl Fn(&StateOperation) -> VectorClock,
) -> Resolution {
    let a_wins = match policy {
        ConflictResolution::LastWriterWins => a.timestamp >= b.timestamp,
        ConflictResolution::VectorClock => {
            let (ca, cb) = (clock_of(&a), clock_of(&b));
            if ca.happens_before(&cb) {
                false
            } else if cb.happens_before(&ca) {
                true
            } else {
                // genuinely concurrent: fall back to timestamp as tiebreak
                a.timestamp >= b.timestamp
            }
        }
        ConflictResolution::ConsensusBased => trust_of(&a) >= trust_of(&b),
    };

    let (winner, loser) = if a_wins { (a, b) } else { (b, a) };
    let rollback = RollbackOperation {
        original_op_id: loser.id,
        target: loser.target.clone(),
        restore_value: prior_value,
    };
    Resolution { winner, loser, rollback }
}
