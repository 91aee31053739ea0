//! Shared fakes for integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use infermesh::backup::{BackupManager, BackupOptions};
use infermesh::deploy::fsm::FsmSettings;
use infermesh::deploy::orchestrator::{Orchestrator, OrchestratorConfig};
use infermesh::deploy::runtime::{ContainerInfo, ContainerRuntime, RunRequest};
use infermesh::errors::MeshError;
use infermesh::health::{HealthChecker, HealthProbe};
use infermesh::registry::{default_catalog, ServiceRegistry};
use infermesh::storage::layout::VaultLayout;
use infermesh::storage::settings::Settings;
use infermesh::utils::ShutdownTrigger;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub request: RunRequest,
    pub running: bool,
}

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    networks: BTreeSet<String>,
    calls: Vec<String>,
    next_id: u64,
}

/// In-memory container runtime that behaves like docker for names:
/// starting a second container under a taken name fails.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    fail_build: Mutex<HashSet<String>>,
    fail_run: Mutex<HashSet<String>>,
    interrupt_on_run: Mutex<Option<(String, ShutdownTrigger)>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_build_of(&self, service: &str) {
        self.fail_build.lock().unwrap().insert(service.to_string());
    }

    pub fn fail_run_of(&self, service: &str) {
        self.fail_run.lock().unwrap().insert(service.to_string());
    }

    /// Fire `trigger` right after `service` is started
    pub fn interrupt_after_run_of(&self, service: &str, trigger: ShutdownTrigger) {
        *self.interrupt_on_run.lock().unwrap() = Some((service.to_string(), trigger));
    }

    /// Leave a stale container around, as a crashed previous run would
    pub fn seed_container(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("stale{}", state.next_id);
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id,
                request: RunRequest {
                    image: "old".to_string(),
                    name: name.to_string(),
                    network: None,
                    ports: vec![],
                    volumes: vec![],
                    devices: vec![],
                    gpus: None,
                    env: vec![],
                    restart_policy: None,
                    args: vec![],
                },
                running: true,
            },
        );
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn networks(&self) -> Vec<String> {
        self.state.lock().unwrap().networks.iter().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn log(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

/// Service name from an image like `infermesh/coder:latest`
fn service_of_image(image: &str) -> &str {
    let base = image.rsplit('/').next().unwrap_or(image);
    base.split(':').next().unwrap_or(base)
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build(&self, _context: &Path, _dockerfile: &Path, image: &str) -> Result<String, MeshError> {
        self.log(format!("build {}", image));
        if self.fail_build.lock().unwrap().contains(service_of_image(image)) {
            return Err(MeshError::RuntimeError(format!("build of {} exited with 1", image)));
        }
        Ok(format!("sha256:{}", service_of_image(image)))
    }

    async fn run(&self, request: &RunRequest) -> Result<String, MeshError> {
        self.log(format!("run {}", request.name));
        if self.fail_run.lock().unwrap().contains(&request.name) {
            return Err(MeshError::RuntimeError("port is already allocated".to_string()));
        }

        let id = {
            let mut state = self.state.lock().unwrap();
            if state.containers.contains_key(&request.name) {
                return Err(MeshError::RuntimeError(format!(
                    "Conflict. The container name \"/{}\" is already in use",
                    request.name
                )));
            }
            state.next_id += 1;
            let id = format!("c{:04}", state.next_id);
            state.containers.insert(
                request.name.clone(),
                FakeContainer {
                    id: id.clone(),
                    request: request.clone(),
                    running: true,
                },
            );
            id
        };

        // A worker writing into its own data directory
        if let Some(data) = request.volumes.iter().find(|v| v.container_path == "/data") {
            std::fs::write(data.host_path.join("state.txt"), format!("written by {}", request.name))?;
        }

        let hook = self.interrupt_on_run.lock().unwrap().clone();
        if let Some((service, trigger)) = hook {
            if service == request.name {
                trigger.trigger();
            }
        }
        Ok(id)
    }

    async fn stop(&self, name: &str) -> Result<(), MeshError> {
        self.log(format!("stop {}", name));
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(name) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), MeshError> {
        self.log(format!("remove {}", name));
        self.state.lock().unwrap().containers.remove(name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, MeshError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, MeshError> {
        Ok(self.state.lock().unwrap().containers.get(name).map(|c| ContainerInfo {
            id: c.id.clone(),
            name: name.to_string(),
            image: c.request.image.clone(),
            running: c.running,
            status: if c.running { "running" } else { "exited" }.to_string(),
        }))
    }

    async fn create_network(&self, name: &str) -> Result<(), MeshError> {
        self.log(format!("network create {}", name));
        self.state.lock().unwrap().networks.insert(name.to_string());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), MeshError> {
        self.log(format!("network rm {}", name));
        self.state.lock().unwrap().networks.remove(name);
        Ok(())
    }
}

/// Probe answering healthy for a fixed set of ports and counting calls.
///
/// Unhealthy ports can be made to hang for a while before failing, like a
/// worker that accepts connections but never answers.
#[derive(Default)]
pub struct ScriptedProbe {
    healthy_ports: Mutex<HashSet<u16>>,
    stall: Duration,
    calls: AtomicU32,
    calls_by_port: Mutex<BTreeMap<u16, u32>>,
}

impl ScriptedProbe {
    pub fn healthy(ports: &[u16]) -> Self {
        let probe = Self::default();
        probe.healthy_ports.lock().unwrap().extend(ports.iter().copied());
        probe
    }

    /// Hang for `stall` before reporting an unhealthy port
    pub fn stalling(mut self, stall: Duration) -> Self {
        self.stall = stall;
        self
    }

    pub fn set_healthy(&self, port: u16, healthy: bool) {
        let mut ports = self.healthy_ports.lock().unwrap();
        if healthy {
            ports.insert(port);
        } else {
            ports.remove(&port);
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, port: u16) -> u32 {
        self.calls_by_port.lock().unwrap().get(&port).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self, base_url: &str) -> Result<(), MeshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let port = url::Url::parse(base_url)
            .ok()
            .and_then(|u| u.port())
            .ok_or_else(|| MeshError::Internal(format!("no port in {}", base_url)))?;
        *self.calls_by_port.lock().unwrap().entry(port).or_insert(0) += 1;

        let healthy = self.healthy_ports.lock().unwrap().contains(&port);
        if healthy {
            return Ok(());
        }
        if !self.stall.is_zero() {
            tokio::time::sleep(self.stall).await;
        }
        Err(MeshError::Internal("connection refused".to_string()))
    }
}

/// Every port of the default catalog
pub const ALL_PORTS: [u16; 5] = [8080, 8081, 8082, 8083, 8084];

pub struct Harness {
    pub dir: TempDir,
    pub layout: VaultLayout,
    pub runtime: Arc<FakeRuntime>,
    pub probe: Arc<ScriptedProbe>,
    pub orchestrator: Orchestrator,
}

/// Orchestrator over the default catalog with fakes, a temp vault and
/// short health bounds (3 attempts, 10ms apart)
pub async fn harness(models: &[&str], probe: ScriptedProbe, runtime: FakeRuntime) -> Harness {
    harness_with(models, probe, runtime, |_| {}).await
}

pub async fn harness_with(
    models: &[&str],
    probe: ScriptedProbe,
    runtime: FakeRuntime,
    configure: impl FnOnce(&mut OrchestratorConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let layout = VaultLayout::new(dir.path().join("vault"));
    layout.setup().await.unwrap();
    for model in models {
        std::fs::write(layout.models_dir().path().join(model), b"weights").unwrap();
    }

    let mut config = OrchestratorConfig::from_settings(&Settings::default(), layout.clone());
    config.fsm = FsmSettings {
        health_attempts: 3,
        health_interval: Duration::from_millis(10),
    };
    configure(&mut config);

    let runtime = Arc::new(runtime);
    let probe = Arc::new(probe);
    let orchestrator = Orchestrator::new(
        config,
        ServiceRegistry::new(default_catalog()).unwrap(),
        runtime.clone(),
        HealthChecker::new(probe.clone()),
        BackupManager::new(layout.backups_dir(), BackupOptions::default()),
    );

    Harness {
        dir,
        layout,
        runtime,
        probe,
        orchestrator,
    }
}

/// Relative path to contents of every file under `root`, skipping the
/// given top-level entries
pub fn snapshot(root: &Path, skip: &[&str]) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(base: &Path, path: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in std::fs::read_dir(path).unwrap() {
            let path = entry.unwrap().path();
            let rel = path.strip_prefix(base).unwrap().to_path_buf();
            if path.is_dir() {
                out.insert(rel.join(""), Vec::new());
                walk(base, &path, out);
            } else {
                out.insert(rel, std::fs::read(&path).unwrap());
            }
        }
    }

    let mut out = BTreeMap::new();
    for entry in std::fs::read_dir(root).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        if skip.contains(&name.as_str()) {
            continue;
        }
        let rel = PathBuf::from(&name);
        if path.is_dir() {
            out.insert(rel.join(""), Vec::new());
            walk(root, &path, &mut out);
        } else {
            out.insert(rel, std::fs::read(&path).unwrap());
        }
    }
    out
}
