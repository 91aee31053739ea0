//! Service definitions

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Static description of one deployable service.
///
/// Loaded once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Unique name, also used as the container name
    pub name: String,

    /// Published port; `None` for internal-only services
    #[serde(default)]
    pub port: Option<u16>,

    /// Precondition file, relative to `vault/models` unless absolute
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Arguments passed to the container entrypoint
    #[serde(default)]
    pub launch_args: Vec<String>,

    /// Attach the container to the shared network
    #[serde(default = "default_true")]
    pub depends_on_network: bool,

    /// Image name override; defaults to `<image_prefix><name>:latest`
    #[serde(default)]
    pub image: Option<String>,

    /// Dockerfile relative to the build root; defaults to `<name>/Dockerfile`
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,

    /// Host devices passed through to the container
    #[serde(default)]
    pub devices: Vec<String>,

    /// GPU request passed as `--gpus`
    #[serde(default)]
    pub gpus: Option<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl ServiceSpec {
    /// Create a spec with defaults for everything but the name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: None,
            model_path: None,
            launch_args: Vec::new(),
            depends_on_network: true,
            image: None,
            dockerfile: None,
            devices: Vec::new(),
            gpus: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_model(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(model_path.into());
        self
    }

    pub fn with_launch_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launch_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Image reference used for build and run
    pub fn image_name(&self, image_prefix: &str) -> String {
        match &self.image {
            Some(image) => image.clone(),
            None => format!("{}{}:latest", image_prefix, self.name),
        }
    }

    /// Dockerfile path relative to the build root
    pub fn dockerfile_path(&self) -> PathBuf {
        self.dockerfile
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.name).join("Dockerfile"))
    }

    /// File name of the model, used as its mount point inside the container
    pub fn model_file_name(&self) -> Option<String> {
        self.model_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}
