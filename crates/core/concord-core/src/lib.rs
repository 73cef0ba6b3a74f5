//! Ambient stack shared by every crate in the concord workspace: error
//! taxonomy, layered configuration, introspection traits, an injected
//! clock, a typed event bus, and bounded-store helpers.
//!
//! Domain crates (`concord-consensus`, `concord-state`, `concord-voting`,
//! `concord-detector`, `concord-perf`, `concord-security`) depend on this
//! crate and nothing else from the workspace; `concord-facade` is the only
//! crate that depends on all of them.

pub mod bounded;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod traits;

pub use bounded::TrimmedHistory;
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ClusterConfig, ConflictResolution};
pub use error::{ConcordError, ConcordResult};
pub use events::{ConcordEvent, EventBus};
pub use traits::{
    HealthCheck, HealthLevel, HealthStatus, Identifiable, Lifecycle, Observable, ObservableState,
    ObservableStatus, Validatable,
};

/// Crate version, taken from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
