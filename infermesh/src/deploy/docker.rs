//! Docker CLI runtime client

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::runtime::{ContainerInfo, ContainerRuntime, RunRequest};
use crate::errors::MeshError;

const NOT_FOUND_MARKERS: &[&str] = &["No such container", "No such object", "not found"];

/// Container runtime driven through the `docker` command line
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    unit_prefix: Option<String>,
}

impl DockerCli {
    /// Create a client for `binary` (`docker`, `podman`, ...)
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            unit_prefix: None,
        }
    }

    /// Also stop `<prefix><service>.service` systemd units during cleanup
    pub fn with_unit_prefix(mut self, prefix: Option<String>) -> Self {
        self.unit_prefix = prefix;
        self
    }

    async fn exec(&self, args: &[String]) -> Result<Output, MeshError> {
        debug!("{} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| MeshError::RuntimeError(format!("Failed to run {}: {}", self.binary, e)))
    }

    /// Run a command and return trimmed stdout, or the stderr as an error
    async fn exec_ok(&self, args: &[String]) -> Result<String, MeshError> {
        let output = self.exec(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(MeshError::RuntimeError(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Like `exec_ok`, but a missing object counts as success
    async fn exec_tolerate_missing(&self, args: &[String]) -> Result<(), MeshError> {
        let output = self.exec(args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
            debug!("Ignoring missing object: {}", stderr.trim());
            return Ok(());
        }
        Err(MeshError::RuntimeError(format!(
            "{} {} failed: {}",
            self.binary,
            args.join(" "),
            stderr.trim()
        )))
    }
}

fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Build the `docker run` argument list for a request
pub fn run_args(request: &RunRequest) -> Vec<String> {
    let mut argv = args(["run", "-d", "--name", request.name.as_str()]);

    if let Some(policy) = &request.restart_policy {
        argv.extend(args(["--restart", policy.as_str()]));
    }
    if let Some(network) = &request.network {
        argv.extend(args(["--network", network.as_str()]));
    }
    for port in &request.ports {
        argv.push("-p".to_string());
        argv.push(port.to_arg());
    }
    for volume in &request.volumes {
        argv.push("-v".to_string());
        argv.push(volume.to_arg());
    }
    for device in &request.devices {
        argv.push("--device".to_string());
        argv.push(device.clone());
    }
    if let Some(gpus) = &request.gpus {
        argv.extend(args(["--gpus", gpus.as_str()]));
    }
    for (key, value) in &request.env {
        argv.push("-e".to_string());
        argv.push(format!("{}={}", key, value));
    }

    argv.push(request.image.clone());
    argv.extend(request.args.iter().cloned());
    argv
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build(&self, context: &Path, dockerfile: &Path, image: &str) -> Result<String, MeshError> {
        info!("Building image {} from {}", image, dockerfile.display());
        self.exec_ok(&args([
            "build".to_string(),
            "-t".to_string(),
            image.to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            context.display().to_string(),
        ]))
        .await?;

        self.exec_ok(&args(["image", "inspect", "--format", "{{.Id}}", image]))
            .await
    }

    async fn run(&self, request: &RunRequest) -> Result<String, MeshError> {
        info!("Running container {} from {}", request.name, request.image);
        self.exec_ok(&run_args(request)).await
    }

    async fn stop(&self, name: &str) -> Result<(), MeshError> {
        self.exec_tolerate_missing(&args(["stop", name])).await
    }

    async fn remove(&self, name: &str) -> Result<(), MeshError> {
        self.exec_tolerate_missing(&args(["rm", "-f", name])).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, MeshError> {
        // The name filter is a substring regex; anchor client-side as well
        let filter = format!("name=^/?{}", prefix);
        let stdout = self
            .exec_ok(&args(["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"]))
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(prefix))
            .map(str::to_string)
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, MeshError> {
        let output = self
            .exec(&args([
                "inspect",
                "--type",
                "container",
                "--format",
                "{{.Id}}|{{.Name}}|{{.Config.Image}}|{{.State.Running}}|{{.State.Status}}",
                name,
            ]))
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Ok(None);
            }
            return Err(MeshError::RuntimeError(stderr.trim().to_string()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_inspect_line(stdout.trim()))
    }

    async fn create_network(&self, name: &str) -> Result<(), MeshError> {
        let exists = self
            .exec(&args(["network", "inspect", name]))
            .await?
            .status
            .success();
        if exists {
            debug!("Network {} already exists", name);
            return Ok(());
        }
        info!("Creating network {}", name);
        self.exec_ok(&args(["network", "create", name])).await?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), MeshError> {
        self.exec_tolerate_missing(&args(["network", "rm", name])).await
    }

    async fn stop_unit(&self, service: &str) -> Result<(), MeshError> {
        let Some(prefix) = &self.unit_prefix else {
            return Ok(());
        };
        let unit = format!("{}{}.service", prefix, service);

        let active = Command::new("systemctl")
            .args(["is-active", "--quiet", unit.as_str()])
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if !active {
            return Ok(());
        }

        info!("Stopping systemd unit {}", unit);
        for verb in ["stop", "disable"] {
            let status = Command::new("systemctl")
                .args([verb, unit.as_str()])
                .status()
                .await
                .map_err(|e| MeshError::RuntimeError(format!("Failed to run systemctl: {}", e)))?;
            if !status.success() {
                return Err(MeshError::RuntimeError(format!(
                    "systemctl {} {} failed",
                    verb, unit
                )));
            }
        }
        Ok(())
    }
}

fn parse_inspect_line(line: &str) -> Option<ContainerInfo> {
    let mut parts = line.splitn(5, '|');
    let id = parts.next()?.to_string();
    let name = parts.next()?.trim_start_matches('/').to_string();
    let image = parts.next()?.to_string();
    let running = parts.next()? == "true";
    let status = parts.next()?.to_string();
    Some(ContainerInfo {
        id,
        name,
        image,
        running,
        status,
    })
}
