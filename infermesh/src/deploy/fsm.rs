//! Finite State Machine for per-service deployment

use std::time::Duration;

use crate::models::deployment::ServiceState;

/// FSM settings
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// Health check attempts before a service is declared unhealthy
    pub health_attempts: u32,

    /// Delay between health check attempts
    pub health_interval: Duration,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self {
            health_attempts: 30,
            health_interval: Duration::from_secs(2),
        }
    }
}

impl FsmSettings {
    /// Upper bound on time spent health checking one service
    pub fn health_budget(&self) -> Duration {
        self.health_interval * self.health_attempts
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Precondition not met
    Skip(String),

    /// Start building the image
    Build,

    /// Container started
    Started(String),

    /// Build or run failed
    Fail(String),

    /// Health check passed, or nothing to check
    Pass,

    /// Health check exhausted
    Unhealthy(String),

    /// Full-run rollback tore the service down
    RollBack,
}

/// Per-service deployment FSM.
///
/// Transitions are monotonic: nothing leaves `RolledBack`.
#[derive(Debug, Clone)]
pub struct ServiceFsm {
    state: ServiceState,
}

impl ServiceFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: ServiceState::Pending,
        }
    }

    /// Get current state
    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    /// Whether a container may exist for this service in the current attempt
    pub fn holds_container(&self) -> bool {
        matches!(
            self.state,
            ServiceState::Building
                | ServiceState::Running(_)
                | ServiceState::Healthy
                | ServiceState::Unhealthy(_)
        )
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, event) {
            // From Pending
            (ServiceState::Pending, DeploymentEvent::Skip(reason)) => ServiceState::Skipped(reason),
            (ServiceState::Pending, DeploymentEvent::Build) => ServiceState::Building,

            // From Building
            (ServiceState::Building, DeploymentEvent::Started(id)) => ServiceState::Running(id),
            (ServiceState::Building, DeploymentEvent::Fail(reason)) => ServiceState::Failed(reason),

            // From Running
            (ServiceState::Running(_), DeploymentEvent::Pass) => ServiceState::Healthy,
            (ServiceState::Running(_), DeploymentEvent::Unhealthy(err)) => {
                ServiceState::Unhealthy(err)
            }

            // Rollback reaches anything that may own a container
            (
                ServiceState::Building
                | ServiceState::Running(_)
                | ServiceState::Healthy
                | ServiceState::Unhealthy(_),
                DeploymentEvent::RollBack,
            ) => ServiceState::RolledBack,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for ServiceFsm {
    fn default() -> Self {
        Self::new()
    }
}
