//! Deterministic, conflict-resolving replicated state machine: a key/value
//! map mutated by a small enumerated operation set, fed by whichever
//! consensus engine (PBFT or Raft) is wired in by the caller.

pub mod conflict;
pub mod error;
pub mod machine;
pub mod traits;
pub mod types;
pub mod vector_clock;

pub use conflict::{conflicts, resolve, Resolution};
pub use error::StateError;
pub use machine::StateMachine;
pub use traits::{Replicator, StateStore};
pub use types::{ExecuteFn, OperationKind, RollbackOperation, Snapshot, StateOperation};
pub use vector_clock::VectorClock;
