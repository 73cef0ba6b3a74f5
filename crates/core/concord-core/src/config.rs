//! Layered configuration: defaults baked in via `Default`, overridable from
//! a TOML file and `CONCORD_*` environment variables, following the
//! `ConfigManager` multi-source merge pattern this crate is patterned on.

use crate::{ConcordError, ConcordResult, Validatable};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Conflict resolution policy for the replicated state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// The operation with the later timestamp wins.
    LastWriterWins,
    /// Causal ordering via per-executor vector clocks.
    VectorClock,
    /// The operation from the higher-trust executor wins.
    ConsensusBased,
}

/// Every enumerated configuration option from the external interfaces
/// section, collected on one struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster size; derives `f` and quorum.
    pub total_agents: usize,
    /// Max wait per PBFT phase.
    pub consensus_timeout: Duration,
    /// Raft randomised election window, minimum.
    pub election_timeout_min: Duration,
    /// Raft randomised election window, maximum.
    pub election_timeout_max: Duration,
    /// Leader heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Proposal batching: number of proposals per batch.
    pub batch_size: usize,
    /// Proposal batching: max wait before flushing a partial batch.
    pub batch_timeout: Duration,
    /// Max concurrent consensus pipeline stages.
    pub pipeline_depth: usize,
    /// Message dedup cache capacity.
    pub cache_size: usize,
    /// Peers per state operation.
    pub replication_factor: usize,
    /// Operations applied per snapshot checkpoint.
    pub checkpoint_interval: u64,
    /// Operation-log trim threshold.
    pub max_operation_history: usize,
    /// Conflict resolution policy.
    pub conflict_resolution: ConflictResolution,
    /// Minimum trust level required to participate in consensus.
    pub min_trust_level: f64,
    /// Force AES-GCM encryption on all payloads.
    pub require_encryption: bool,
    /// Root key rotation cadence.
    pub key_rotation_interval: Duration,
    /// Enable circuit breaker on DDoS pattern detection.
    pub ddos_protection: bool,
    /// Maximum retained snapshots.
    pub max_retained_snapshots: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            total_agents: 4,
            consensus_timeout: Duration::from_secs(30),
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            batch_size: 50,
            batch_timeout: Duration::from_millis(100),
            pipeline_depth: 4,
            cache_size: 10_000,
            replication_factor: 3,
            checkpoint_interval: 1_000,
            max_operation_history: 50_000,
            conflict_resolution: ConflictResolution::LastWriterWins,
            min_trust_level: 0.3,
            require_encryption: true,
            key_rotation_interval: Duration::from_secs(24 * 3600),
            ddos_protection: true,
            max_retained_snapshots: 10,
        }
    }
}

impl ClusterConfig {
    /// Byzantine failure tolerance `f = floor((n-1)/3)`.
    #[must_use]
    pub fn byzantine_threshold(&self) -> usize {
        (self.total_agents.saturating_sub(1)) / 3
    }

    /// Minimum Byzantine quorum size `floor(2n/3)+1`.
    #[must_use]
    pub fn byzantine_quorum(&self) -> usize {
        (2 * self.total_agents) / 3 + 1
    }

    /// Raft majority `floor(n/2)+1`.
    #[must_use]
    pub fn raft_majority(&self) -> usize {
        self.total_agents / 2 + 1
    }

    /// Override `total_agents`.
    #[must_use]
    pub fn with_total_agents(mut self, n: usize) -> Self {
        self.total_agents = n;
        self
    }

    /// Override `consensus_timeout`.
    #[must_use]
    pub fn with_consensus_timeout(mut self, timeout: Duration) -> Self {
        self.consensus_timeout = timeout;
        self
    }

    /// Override `conflict_resolution`.
    #[must_use]
    pub fn with_conflict_resolution(mut self, policy: ConflictResolution) -> Self {
        self.conflict_resolution = policy;
        self
    }

    /// Override `require_encryption`.
    #[must_use]
    pub fn with_require_encryption(mut self, required: bool) -> Self {
        self.require_encryption = required;
        self
    }

    /// Load from a TOML file, falling back to defaults for absent fields.
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConcordResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `CONCORD_*` environment variables onto an existing config.
    /// Only the handful of scalar fields most commonly tuned at deploy time
    /// are supported; everything else must come from the TOML file.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("CONCORD_TOTAL_AGENTS") {
            if let Ok(n) = v.parse() {
                self.total_agents = n;
            }
        }
        if let Ok(v) = std::env::var("CONCORD_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("CONCORD_REQUIRE_ENCRYPTION") {
            if let Ok(b) = v.parse() {
                self.require_encryption = b;
            }
        }
        self
    }
}

impl Validatable for ClusterConfig {
    fn validate(&self) -> ConcordResult<()> {
        if self.total_agents == 0 {
            return Err(ConcordError::config("total_agents must be positive"));
        }
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(ConcordError::config(
                "election_timeout_min must be less than election_timeout_max",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_trust_level) {
            return Err(ConcordError::config("min_trust_level must be in [0, 1]"));
        }
        if self.batch_size == 0 {
            return Err(ConcordError::config("batch_size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ClusterConfig::default().validate().is_ok());
    }

    #[test]
    fn quorum_math_matches_spec() {
        let config = ClusterConfig::default().with_total_agents(7);
        assert_eq!(config.byzantine_threshold(), 2);
        assert_eq!(config.byzantine_quorum(), 5);
        assert_eq!(config.raft_majority(), 4);
    }

    #[test]
    fn invalid_election_window_is_rejected() {
        let mut config = ClusterConfig::default();
        config.election_timeout_min = Duration::from_millis(500);
        config.election_timeout_max = Duration::from_millis(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        std::fs::write(&path, "total_agents = 10\nbatch_size = 25\n").unwrap();
        let config = ClusterConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.total_agents, 10);
        assert_eq!(config.batch_size, 25);
        // unspecified fields keep their defaults
        assert_eq!(config.replication_factor, ClusterConfig::default().replication_factor);
    }
}
