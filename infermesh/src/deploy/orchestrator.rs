//! Deployment orchestrator
//!
//! Drives every service of the registry, strictly one after another,
//! through cleanup, build, run and health check. A precondition miss skips
//! the service; a build or run failure marks it failed and moves on; an
//! unhealthy service or an interrupt tears down the whole attempt and puts
//! the vault back the way it was before the attempt started.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::backup::BackupManager;
use crate::deploy::fsm::{DeploymentEvent, FsmSettings};
use crate::deploy::journal::RecordStore;
use crate::deploy::runtime::{ContainerInfo, ContainerRuntime, PortMapping, RunRequest, VolumeMount};
use crate::deploy::tracker::DeploymentTracker;
use crate::errors::MeshError;
use crate::health::HealthChecker;
use crate::models::backup::BackupRecord;
use crate::models::deployment::DeploymentRecord;
use crate::models::service::ServiceSpec;
use crate::registry::ServiceRegistry;
use crate::storage::layout::VaultLayout;
use crate::storage::settings::Settings;
use crate::utils::ShutdownSignal;

/// Reason recorded for services that are skipped for a missing model
pub const MODEL_UNAVAILABLE: &str = "model unavailable";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Vault paths
    pub layout: VaultLayout,

    /// Shared network name
    pub network: String,

    /// Host address ports are published on
    pub bind_host: String,

    /// Prefix for generated image names
    pub image_prefix: String,

    /// Directory holding per-service build contexts
    pub build_root: PathBuf,

    /// Restart policy for started containers
    pub restart_policy: Option<String>,

    /// Health check bounds
    pub fsm: FsmSettings,

    /// Restore the pre-deployment backup on full-run rollback
    pub restore_vault: bool,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings, layout: VaultLayout) -> Self {
        Self {
            layout,
            network: settings.runtime.network.clone(),
            bind_host: settings.runtime.bind_host.clone(),
            image_prefix: settings.runtime.image_prefix.clone(),
            build_root: settings.runtime.build_root.clone(),
            restart_policy: settings.runtime.restart_policy.clone(),
            fsm: settings.fsm_settings(),
            restore_vault: settings.rollback.restore_vault,
        }
    }

    /// Host used to reach published ports from this process
    fn probe_host(&self) -> &str {
        match self.bind_host.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            host => host,
        }
    }
}

/// Containers currently present for one service
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub name: String,
    pub containers: Vec<ContainerInfo>,
}

/// Result of deploying a single service
enum ServiceStep {
    /// Move on to the next service
    Continue,

    /// Abort the attempt and roll everything back
    RollbackRequired(MeshError),
}

/// Deployment orchestrator
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: ServiceRegistry,
    runtime: Arc<dyn ContainerRuntime>,
    health: HealthChecker,
    backups: BackupManager,
    records: RecordStore,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: OrchestratorConfig,
        registry: ServiceRegistry,
        runtime: Arc<dyn ContainerRuntime>,
        health: HealthChecker,
        backups: BackupManager,
    ) -> Self {
        let records = RecordStore::new(config.layout.deployments_dir());
        Self {
            config,
            registry,
            runtime,
            health,
            backups,
            records,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    fn uses_network(&self) -> bool {
        self.registry.services().iter().any(|s| s.depends_on_network)
    }

    /// Deploy every service in registry order.
    ///
    /// Returns the finalized record, which is also persisted under
    /// `vault/logs/deployments`. Only failures that prevent the attempt from
    /// starting at all are returned as errors.
    pub async fn deploy_all(
        &self,
        timestamp: DateTime<Utc>,
        shutdown: &ShutdownSignal,
    ) -> Result<DeploymentRecord, MeshError> {
        let deployment_id = self.records.allocate_id(timestamp).await;
        let mut tracker = DeploymentTracker::new(deployment_id, timestamp, self.registry.names());
        info!(deployment_id = %tracker.deployment_id(), "Starting deployment of {} service(s)", self.registry.services().len());

        if let Err(e) = self.prepare(&mut tracker).await {
            error!("Deployment could not start: {}", e);
            tracker.record_failure(None, &e);
            tracker.skip_pending("deployment aborted before start");
            let record = tracker.finalize(Utc::now());
            self.persist(&record).await;
            return Err(e);
        }

        let mut rollback_cause = None;
        for spec in self.registry.services() {
            if shutdown.is_triggered() {
                rollback_cause = Some(MeshError::Interrupted(format!(
                    "interrupt received before {}",
                    spec.name
                )));
                break;
            }

            match self.deploy_service(spec, &mut tracker, shutdown).await {
                ServiceStep::Continue => {}
                ServiceStep::RollbackRequired(cause) => {
                    rollback_cause = Some(cause);
                    break;
                }
            }
        }

        if let Some(cause) = rollback_cause {
            if matches!(cause, MeshError::Interrupted(_)) {
                tracker.record_failure(None, &cause);
            }
            error!(deployment_id = %tracker.deployment_id(), "Full-run rollback: {}", cause);
            self.rollback_run(&mut tracker).await;
        }

        let record = tracker.finalize(Utc::now());
        info!(
            deployment_id = %record.deployment_id,
            outcome = %record.outcome,
            "Deployment finished"
        );
        self.persist(&record).await;
        Ok(record)
    }

    /// Pre-deployment backup and shared network
    async fn prepare(&self, tracker: &mut DeploymentTracker) -> Result<(), MeshError> {
        let layout = &self.config.layout;
        layout.setup().await?;

        let backup = self.backups.create(&layout.root).await?;
        tracker.set_backup_id(backup.id);

        if self.uses_network() {
            self.runtime.create_network(&self.config.network).await?;
        }
        Ok(())
    }

    async fn persist(&self, record: &DeploymentRecord) {
        if let Err(e) = self.records.save(record).await {
            error!(deployment_id = %record.deployment_id, "Failed to persist deployment record: {}", e);
        }
    }

    async fn deploy_service(
        &self,
        spec: &ServiceSpec,
        tracker: &mut DeploymentTracker,
        shutdown: &ShutdownSignal,
    ) -> ServiceStep {
        let name = spec.name.as_str();

        // 1. Precondition
        if let Some(model) = &spec.model_path {
            let file = self.config.layout.model_file(model);
            if !file.exists().await {
                warn!(service = name, "Skipping: model {} not found", file.path().display());
                tracker.transition(name, DeploymentEvent::Skip(MODEL_UNAVAILABLE.to_string()));
                return ServiceStep::Continue;
            }
        }

        // 2. Idempotent cleanup of any previous instance
        self.remove_existing(name).await;

        // 3. Build
        tracker.transition(name, DeploymentEvent::Build);
        let image = spec.image_name(&self.config.image_prefix);
        let dockerfile = self.config.build_root.join(spec.dockerfile_path());
        let context = dockerfile
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.build_root.clone());
        if let Err(e) = self.runtime.build(&context, &dockerfile, &image).await {
            let err = MeshError::BuildError {
                service: name.to_string(),
                reason: e.to_string(),
            };
            error!(service = name, "{}", err);
            tracker.transition(name, DeploymentEvent::Fail(err.to_string()));
            tracker.record_failure(Some(name), &err);
            return ServiceStep::Continue;
        }

        if shutdown.is_triggered() {
            return ServiceStep::RollbackRequired(MeshError::Interrupted(format!(
                "interrupt received while building {}",
                name
            )));
        }

        // 4. Run
        let container_id = match self.start_container(spec, image).await {
            Ok(id) => id,
            Err(e) => {
                let err = MeshError::RunError {
                    service: name.to_string(),
                    reason: e.to_string(),
                };
                error!(service = name, "{}", err);
                // A failed run can leave a created but stopped container behind
                self.teardown_container(name, None).await;
                tracker.transition(name, DeploymentEvent::Fail(err.to_string()));
                tracker.record_failure(Some(name), &err);
                return ServiceStep::Continue;
            }
        };
        info!(service = name, container_id = %container_id, "Container started");
        tracker.transition(name, DeploymentEvent::Started(container_id.clone()));
        tracker.container_started(name, &container_id);

        // 5. Health check
        if let Some(port) = spec.port {
            let url = format!("http://{}:{}", self.config.probe_host(), port);
            let outcome = self
                .health
                .probe_until(
                    &url,
                    self.config.fsm.health_attempts,
                    self.config.fsm.health_interval,
                    shutdown,
                )
                .await;

            if outcome.cancelled {
                return ServiceStep::RollbackRequired(MeshError::Interrupted(format!(
                    "interrupt received while health checking {}",
                    name
                )));
            }
            if !outcome.healthy {
                let last_error = outcome.last_error.unwrap_or_default();
                let err = MeshError::HealthCheckTimeout {
                    service: name.to_string(),
                    attempts: outcome.attempts,
                    last_error: last_error.clone(),
                };
                error!(service = name, "{}", err);
                tracker.transition(name, DeploymentEvent::Unhealthy(last_error));
                tracker.record_failure(Some(name), &err);
                return ServiceStep::RollbackRequired(err);
            }
        }

        // 6. Commit
        tracker.transition(name, DeploymentEvent::Pass);
        info!(service = name, "Service healthy");
        ServiceStep::Continue
    }

    fn run_request(&self, spec: &ServiceSpec, image: String) -> RunRequest {
        let layout = &self.config.layout;
        let mut volumes = vec![VolumeMount::rw(
            layout.service_data_dir(&spec.name).path(),
            "/data",
        )];
        if let (Some(model), Some(file_name)) = (&spec.model_path, spec.model_file_name()) {
            volumes.push(VolumeMount::ro(
                layout.model_file(model).path(),
                format!("/models/{}", file_name),
            ));
        }

        RunRequest {
            image,
            name: spec.name.clone(),
            network: spec
                .depends_on_network
                .then(|| self.config.network.clone()),
            ports: spec
                .port
                .map(|port| PortMapping {
                    host_ip: self.config.bind_host.clone(),
                    host_port: port,
                    container_port: port,
                })
                .into_iter()
                .collect(),
            volumes,
            devices: spec.devices.clone(),
            gpus: spec.gpus.clone(),
            env: spec
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            restart_policy: self.config.restart_policy.clone(),
            args: spec.launch_args.clone(),
        }
    }

    async fn start_container(&self, spec: &ServiceSpec, image: String) -> Result<String, MeshError> {
        let layout = &self.config.layout;
        layout.service_data_dir(&spec.name).create().await?;

        let mut request = self.run_request(spec, image);
        let config_dir = layout.service_config_dir(&spec.name);
        if config_dir.exists().await {
            request
                .volumes
                .push(VolumeMount::ro(config_dir.path(), "/config"));
        }

        self.runtime.run(&request).await
    }

    /// Stop and remove the unit, the container and any `<name>-*` orphan for
    /// a service. Best-effort: failures are logged.
    async fn remove_existing(&self, name: &str) -> Vec<MeshError> {
        let mut failures = Vec::new();

        if let Err(e) = self.runtime.stop_unit(name).await {
            warn!(service = name, "Failed to stop managed unit: {}", e);
            failures.push(e);
        }

        let mut containers = match self.runtime.list(name).await {
            Ok(names) => names
                .into_iter()
                .filter(|c| owned_by(name, c))
                .collect(),
            Err(e) => {
                warn!(service = name, "Failed to list containers: {}", e);
                failures.push(e);
                Vec::new()
            }
        };
        if !containers.iter().any(|c| c == name) {
            containers.push(name.to_string());
        }

        for container in containers {
            if container != name {
                info!(service = name, "Removing orphaned container {}", container);
            }
            failures.extend(self.teardown_container(&container, Some(name)).await);
        }
        failures
    }

    async fn teardown_container(&self, container: &str, service: Option<&str>) -> Vec<MeshError> {
        let service = service.unwrap_or(container);
        let mut failures = Vec::new();
        if let Err(e) = self.runtime.stop(container).await {
            warn!(service, "Failed to stop {}: {}", container, e);
            failures.push(e);
        }
        if let Err(e) = self.runtime.remove(container).await {
            warn!(service, "Failed to remove {}: {}", container, e);
            failures.push(e);
        }
        failures
    }

    /// Tear down everything this attempt started, then restore the vault.
    ///
    /// Every step runs even when earlier ones fail.
    async fn rollback_run(&self, tracker: &mut DeploymentTracker) {
        let started = tracker.services_holding_containers();
        for name in started.iter().rev() {
            info!(service = %name, "Rolling back");
            for failure in self.teardown_container(name, None).await {
                tracker.record_failure(Some(name.as_str()), &failure);
            }
            tracker.transition(name, DeploymentEvent::RollBack);
        }
        tracker.skip_pending("deployment rolled back");

        if self.uses_network() {
            if let Err(e) = self.runtime.remove_network(&self.config.network).await {
                error!("Failed to remove network {}: {}", self.config.network, e);
                tracker.record_failure(None, &e);
            }
        }

        if self.config.restore_vault {
            if let Some(backup_id) = tracker.backup_id().map(str::to_string) {
                if let Err(e) = self.restore_backup(&backup_id).await {
                    error!("Failed to restore backup {}: {}", backup_id, e);
                    tracker.record_failure(None, &e);
                }
            }
        }

        tracker.mark_rolled_back();
    }

    /// Restore a backup over the vault after taking a fresh safety backup of
    /// the current state. Returns the safety backup.
    pub async fn restore_backup(&self, id: &str) -> Result<BackupRecord, MeshError> {
        let record = self.backups.find(id).await.map_err(|e| match e {
            MeshError::NotFound(what) => MeshError::RestoreError(format!("{} not found", what)),
            other => other,
        })?;
        let root = &self.config.layout.root;

        // Retention is deferred so it cannot prune the archive being restored
        let safety = self.backups.create_unpruned(root).await?;
        info!("Safety backup {} taken before restoring {}", safety.id, record.id);

        self.backups.restore(&record, root).await?;

        if let Err(e) = self.backups.prune(self.backups.keep_last()).await {
            warn!("Backup retention failed: {}", e);
        }
        Ok(safety)
    }

    /// Tear down every managed container, unit and the network.
    ///
    /// Safe to call when nothing is running.
    pub async fn cleanup(&self) -> Result<(), MeshError> {
        info!("Cleaning up all managed services");
        let mut failures = Vec::new();

        for spec in self.registry.services().iter().rev() {
            failures.extend(self.remove_existing(&spec.name).await);
        }

        if self.uses_network() {
            if let Err(e) = self.runtime.remove_network(&self.config.network).await {
                error!("Failed to remove network {}: {}", self.config.network, e);
                failures.push(e);
            }
        }

        if failures.is_empty() {
            info!("Cleanup complete");
            Ok(())
        } else {
            let summary = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(MeshError::RuntimeError(format!(
                "cleanup finished with {} failure(s): {}",
                failures.len(),
                summary
            )))
        }
    }

    /// Containers present per service
    pub async fn status(&self) -> Result<Vec<ServiceStatus>, MeshError> {
        let mut statuses = Vec::new();
        for spec in self.registry.services() {
            let mut containers = Vec::new();
            for name in self.runtime.list(&spec.name).await? {
                if !owned_by(&spec.name, &name) {
                    continue;
                }
                if let Some(info) = self.runtime.inspect(&name).await? {
                    containers.push(info);
                }
            }
            statuses.push(ServiceStatus {
                name: spec.name.clone(),
                containers,
            });
        }
        Ok(statuses)
    }
}

/// Whether a container is the service's own or one of its `<service>-*` orphans
fn owned_by(service: &str, container: &str) -> bool {
    container == service
        || container
            .strip_prefix(service)
            .is_some_and(|rest| rest.starts_with('-'))
}
