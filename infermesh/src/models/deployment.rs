//! Deployment models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-service state within one deployment attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ServiceState {
    /// Not processed yet
    Pending,

    /// Not deployed; carries the reason
    Skipped(String),

    /// Image build in progress
    Building,

    /// Container started; carries the container id
    Running(String),

    /// Passed its health check (or has no port to check)
    Healthy,

    /// Health check exhausted; carries the last error
    Unhealthy(String),

    /// Build or run failed; carries the reason
    Failed(String),

    /// Torn down by a full-run rollback
    RolledBack,
}

impl ServiceState {
    /// Short label for tables and logs
    pub fn label(&self) -> &'static str {
        match self {
            ServiceState::Pending => "pending",
            ServiceState::Skipped(_) => "skipped",
            ServiceState::Building => "building",
            ServiceState::Running(_) => "running",
            ServiceState::Healthy => "healthy",
            ServiceState::Unhealthy(_) => "unhealthy",
            ServiceState::Failed(_) => "failed",
            ServiceState::RolledBack => "rolled_back",
        }
    }

    /// Detail carried by the state, if any
    pub fn detail(&self) -> Option<&str> {
        match self {
            ServiceState::Skipped(s)
            | ServiceState::Running(s)
            | ServiceState::Unhealthy(s)
            | ServiceState::Failed(s) => Some(s),
            _ => None,
        }
    }
}

/// Overall result of a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOutcome {
    Success,
    PartialFailure,
    RolledBack,
}

impl std::fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentOutcome::Success => "success",
            DeploymentOutcome::PartialFailure => "partial_failure",
            DeploymentOutcome::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// A timestamped failure observed during a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub at: DateTime<Utc>,

    /// Service the failure belongs to; `None` for run-wide steps
    pub service: Option<String>,

    /// Failure class, e.g. `BuildError`
    pub class: String,

    pub message: String,
}

/// Final state of one service in a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,

    #[serde(flatten)]
    pub state: ServiceState,
}

/// Finalized record of one `deploy-all` attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: String,

    /// Final per-service states, in deployment order
    pub services: Vec<ServiceEntry>,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: DeploymentOutcome,

    /// Pre-deployment backup id
    pub backup_id: Option<String>,

    /// Containers started during this attempt, by service
    #[serde(default)]
    pub containers: BTreeMap<String, String>,

    #[serde(default)]
    pub failures: Vec<FailureEntry>,
}

impl DeploymentRecord {
    /// Final state of a service
    pub fn state(&self, service: &str) -> Option<&ServiceState> {
        self.services
            .iter()
            .find(|e| e.name == service)
            .map(|e| &e.state)
    }
}
