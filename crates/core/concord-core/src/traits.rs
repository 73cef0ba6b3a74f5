//! Ambient traits implemented by every long-lived component in the workspace.

use crate::ConcordResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Trait for objects that can be observed and monitored.
#[async_trait]
pub trait Observable: Send + Sync {
    /// Current lifecycle status of this object.
    async fn status(&self) -> ConcordResult<ObservableStatus>;

    /// Health information about this object.
    async fn health(&self) -> ConcordResult<HealthStatus>;

    /// Metrics exposed as flat key/value pairs.
    async fn metrics(&self) -> ConcordResult<HashMap<String, f64>>;

    /// Human-readable description of the current state.
    fn describe(&self) -> String;
}

/// Status information for observable objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservableStatus {
    /// Current state.
    pub state: ObservableState,
    /// Last updated timestamp.
    pub last_updated: chrono::DateTime<chrono::Utc>,
    /// Additional metadata.
    pub metadata: HashMap<String, String>,
}

/// Possible states for observable objects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ObservableState {
    /// Object is initializing.
    Initializing,
    /// Object is running normally.
    Running,
    /// Object is degraded but functional.
    Degraded,
    /// Object has failed.
    Failed,
    /// Object is shutting down.
    ShuttingDown,
    /// Object is stopped.
    Stopped,
}

/// Health status information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// Overall health.
    pub overall: HealthLevel,
    /// Health checks by component.
    pub checks: HashMap<String, HealthCheck>,
    /// Last health check timestamp.
    pub last_check: chrono::DateTime<chrono::Utc>,
}

/// Health levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthLevel {
    /// Healthy.
    Healthy,
    /// Warning condition.
    Warning,
    /// Critical condition.
    Critical,
}

/// Individual health check result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheck {
    /// Health level.
    pub level: HealthLevel,
    /// Description of the check.
    pub message: String,
    /// When the check was performed.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Trait for objects with unique identities.
pub trait Identifiable {
    /// Unique identifier for this object.
    fn id(&self) -> Uuid;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Type identifier.
    fn type_name(&self) -> &'static str;
}

/// Trait for validatable objects.
pub trait Validatable {
    /// Validate this object, returning an error describing the first violation found.
    fn validate(&self) -> ConcordResult<()>;

    /// Check if this object is valid.
    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Trait for components that can be started and stopped.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Start the component.
    async fn start(&mut self) -> ConcordResult<()>;

    /// Stop the component.
    async fn stop(&mut self) -> ConcordResult<()>;

    /// Check if the component is running.
    fn is_running(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestObservable {
        id: Uuid,
        name: String,
    }

    #[async_trait]
    impl Observable for TestObservable {
        async fn status(&self) -> ConcordResult<ObservableStatus> {
            Ok(ObservableStatus {
                state: ObservableState::Running,
                last_updated: chrono::Utc::now(),
                metadata: HashMap::new(),
            })
        }

        async fn health(&self) -> ConcordResult<HealthStatus> {
            Ok(HealthStatus {
                overall: HealthLevel::Healthy,
                checks: HashMap::new(),
                last_check: chrono::Utc::now(),
            })
        }

        async fn metrics(&self) -> ConcordResult<HashMap<String, f64>> {
            Ok(HashMap::new())
        }

        fn describe(&self) -> String {
            format!("TestObservable({})", self.name)
        }
    }

    impl Identifiable for TestObservable {
        fn id(&self) -> Uuid {
            self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn type_name(&self) -> &'static str {
            "TestObservable"
        }
    }

    #[tokio::test]
    async fn observable_reports_running() {
        let obs = TestObservable { id: Uuid::new_v4(), name: "n".into() };
        let status = obs.status().await.unwrap();
        assert_eq!(status.state, ObservableState::Running);
        assert_eq!(obs.type_name(), "TestObservable");
    }
}
