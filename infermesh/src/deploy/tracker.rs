//! In-flight deployment bookkeeping
//!
//! A tracker is owned by the orchestrator for the duration of one
//! `deploy-all` attempt and consumed into a [`DeploymentRecord`] when the
//! attempt is finalized.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::deploy::fsm::{DeploymentEvent, ServiceFsm};
use crate::errors::MeshError;
use crate::models::deployment::{
    DeploymentOutcome, DeploymentRecord, FailureEntry, ServiceEntry, ServiceState,
};

/// Mutable state of one deployment attempt
#[derive(Debug)]
pub struct DeploymentTracker {
    deployment_id: String,
    started_at: DateTime<Utc>,
    services: Vec<(String, ServiceFsm)>,
    containers: BTreeMap<String, String>,
    failures: Vec<FailureEntry>,
    backup_id: Option<String>,
    rolled_back: bool,
}

impl DeploymentTracker {
    /// Start tracking an attempt over the given services, in order
    pub fn new<'a>(
        deployment_id: String,
        started_at: DateTime<Utc>,
        services: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            deployment_id,
            started_at,
            services: services
                .into_iter()
                .map(|name| (name.to_string(), ServiceFsm::new()))
                .collect(),
            containers: BTreeMap::new(),
            failures: Vec::new(),
            backup_id: None,
            rolled_back: false,
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn set_backup_id(&mut self, id: String) {
        self.backup_id = Some(id);
    }

    pub fn backup_id(&self) -> Option<&str> {
        self.backup_id.as_deref()
    }

    /// Current state of a service
    pub fn state(&self, service: &str) -> Option<&ServiceState> {
        self.services
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, fsm)| fsm.state())
    }

    /// Apply an event to a service; invalid transitions are logged and ignored
    pub fn transition(&mut self, service: &str, event: DeploymentEvent) {
        let Some((_, fsm)) = self.services.iter_mut().find(|(name, _)| name == service) else {
            warn!(service, "Transition for untracked service ignored");
            return;
        };
        if let Err(e) = fsm.process(event) {
            warn!(service, "{}", e);
        }
    }

    /// Remember a container started in this attempt
    pub fn container_started(&mut self, service: &str, container_id: &str) {
        self.containers
            .insert(service.to_string(), container_id.to_string());
    }

    /// Services that may own a container, in start order
    pub fn services_holding_containers(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, fsm)| fsm.holds_container())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Record a failure with the current time
    pub fn record_failure(&mut self, service: Option<&str>, error: &MeshError) {
        self.failures.push(FailureEntry {
            at: Utc::now(),
            service: service.map(str::to_string),
            class: error.class().to_string(),
            message: error.to_string(),
        });
    }

    pub fn failures(&self) -> &[FailureEntry] {
        &self.failures
    }

    pub fn mark_rolled_back(&mut self) {
        self.rolled_back = true;
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    /// Services not yet touched when the attempt ended
    pub fn skip_pending(&mut self, reason: &str) {
        for (_, fsm) in self.services.iter_mut() {
            if fsm.state() == &ServiceState::Pending {
                let _ = fsm.process(DeploymentEvent::Skip(reason.to_string()));
            }
        }
    }

    /// Compute the outcome from the current states
    pub fn outcome(&self) -> DeploymentOutcome {
        if self.rolled_back {
            return DeploymentOutcome::RolledBack;
        }
        let all_healthy = self
            .services
            .iter()
            .all(|(_, fsm)| fsm.state() == &ServiceState::Healthy);
        if all_healthy {
            DeploymentOutcome::Success
        } else {
            DeploymentOutcome::PartialFailure
        }
    }

    /// Consume the tracker into an immutable record
    pub fn finalize(self, completed_at: DateTime<Utc>) -> DeploymentRecord {
        let outcome = self.outcome();
        DeploymentRecord {
            deployment_id: self.deployment_id,
            services: self
                .services
                .into_iter()
                .map(|(name, fsm)| ServiceEntry {
                    name,
                    state: fsm.state().clone(),
                })
                .collect(),
            started_at: self.started_at,
            completed_at,
            outcome,
            backup_id: self.backup_id,
            containers: self.containers,
            failures: self.failures,
        }
    }
}
