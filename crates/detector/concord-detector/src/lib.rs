//! Malicious-behaviour detection: six built-in rules evaluated over a
//! sliding per-agent observation window, feeding a reputation ledger with
//! trust-level buckets and quarantine/rehabilitation.

pub mod detector;
pub mod error;
pub mod reputation;
pub mod rules;
pub mod types;
pub mod window;

pub use detector::{Detector, RuleConfig};
pub use error::DetectorError;
pub use reputation::{ReputationLedger, ReputationRecord};
pub use rules::Trigger;
pub use types::{BehaviorEvent, Observation, Severity, TrustLevel};
pub use window::ObservationWindow;
