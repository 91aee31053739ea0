//! Service registry

use std::collections::{HashMap, HashSet};

use url::Url;

use crate::errors::MeshError;
use crate::models::service::ServiceSpec;

/// Worker launch arguments for a llama.cpp-style server
fn worker_args(model_file: &str, port: u16) -> Vec<String> {
    vec![
        "--model".to_string(),
        format!("/models/{}", model_file),
        "--host".to_string(),
        "0.0.0.0".to_string(),
        "--port".to_string(),
        port.to_string(),
    ]
}

fn worker(name: &str, port: u16) -> ServiceSpec {
    let model_file = format!("{}.gguf", name);
    ServiceSpec::new(name)
        .with_port(port)
        .with_launch_args(worker_args(&model_file, port))
        .with_model(model_file)
}

/// The built-in five-service catalog, in deployment order.
///
/// The router comes first: it has no model and must be up before workers
/// can be reached through it.
pub fn default_catalog() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("router")
            .with_port(8080)
            .with_launch_args(["serve", "--in-network"]),
        worker("coder", 8081),
        worker("vision", 8082),
        worker("voice", 8083),
        worker("agent", 8084),
    ]
}

fn valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Validated, immutable catalog of services
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<ServiceSpec>,
}

impl ServiceRegistry {
    /// Validate and wrap a list of specs
    pub fn new(services: Vec<ServiceSpec>) -> Result<Self, MeshError> {
        if services.is_empty() {
            return Err(MeshError::ConfigError("no services configured".to_string()));
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for spec in &services {
            if !valid_container_name(&spec.name) {
                return Err(MeshError::ConfigError(format!(
                    "invalid service name '{}'",
                    spec.name
                )));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(MeshError::ConfigError(format!(
                    "duplicate service name '{}'",
                    spec.name
                )));
            }
            if let Some(port) = spec.port {
                if !ports.insert(port) {
                    return Err(MeshError::ConfigError(format!(
                        "port {} used by more than one service",
                        port
                    )));
                }
            }
        }

        // Cleanup removes containers by name prefix, so no service may
        // own a prefix of another's name
        for a in &services {
            for b in &services {
                if a.name != b.name && b.name.starts_with(&a.name) {
                    return Err(MeshError::ConfigError(format!(
                        "service name '{}' is a prefix of '{}'",
                        a.name, b.name
                    )));
                }
            }
        }

        Ok(Self { services })
    }

    /// Services in deployment order
    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.name.as_str())
    }

    /// Base URL of a service, reached at `host` or by service name
    pub fn service_url(&self, spec: &ServiceSpec, host: Option<&str>) -> Result<Option<Url>, MeshError> {
        let Some(port) = spec.port else {
            return Ok(None);
        };
        let host = host.unwrap_or(&spec.name);
        Url::parse(&format!("http://{}:{}", host, port))
            .map(Some)
            .map_err(|e| MeshError::ConfigError(format!("bad URL for {}: {}", spec.name, e)))
    }

    /// URL table for every service with a port
    pub fn service_urls(&self, host: Option<&str>) -> Result<HashMap<String, Url>, MeshError> {
        let mut urls = HashMap::new();
        for spec in &self.services {
            if let Some(url) = self.service_url(spec, host)? {
                urls.insert(spec.name.clone(), url);
            }
        }
        Ok(urls)
    }
}
