//! Container runtime interface

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::MeshError;

/// Bind mount of a host path into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn rw(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    pub fn ro(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }

    /// `-v` argument form
    pub fn to_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Published port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_ip: String,
    pub host_port: u16,
    pub container_port: u16,
}

impl PortMapping {
    /// `-p` argument form
    pub fn to_arg(&self) -> String {
        format!("{}:{}:{}", self.host_ip, self.host_port, self.container_port)
    }
}

/// Everything needed to start one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub image: String,
    pub name: String,
    pub network: Option<String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub devices: Vec<String>,
    pub gpus: Option<String>,
    pub env: Vec<(String, String)>,
    pub restart_policy: Option<String>,
    pub args: Vec<String>,
}

/// Snapshot of one container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub status: String,
}

/// Typed client for the external container runtime.
///
/// Removal of absent objects succeeds, as does creating a network that
/// already exists.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build an image and return its id
    async fn build(&self, context: &Path, dockerfile: &Path, image: &str)
        -> Result<String, MeshError>;

    /// Start a detached container and return its id
    async fn run(&self, request: &RunRequest) -> Result<String, MeshError>;

    async fn stop(&self, name: &str) -> Result<(), MeshError>;

    async fn remove(&self, name: &str) -> Result<(), MeshError>;

    /// Names of all containers, running or not, whose name starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>, MeshError>;

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, MeshError>;

    async fn create_network(&self, name: &str) -> Result<(), MeshError>;

    async fn remove_network(&self, name: &str) -> Result<(), MeshError>;

    /// Stop any host-managed unit that would restart the service behind our back
    async fn stop_unit(&self, _service: &str) -> Result<(), MeshError> {
        Ok(())
    }
}
