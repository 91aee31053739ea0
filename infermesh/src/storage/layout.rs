//! Vault layout

use std::path::{Path, PathBuf};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable naming the vault root
pub const VAULT_ENV: &str = "INFERMESH_VAULT";

/// On-disk layout of the vault.
///
/// ```text
/// vault/
///   models/     precondition files, read-only
///   configs/    settings.json and per-service config dirs, read-only
///   data/       one writable subdirectory per service
///   logs/       log files and deployment records
///   backups/    archives owned by the backup manager
/// ```
#[derive(Debug, Clone)]
pub struct VaultLayout {
    /// Vault root directory
    pub root: PathBuf,
}

impl VaultLayout {
    /// Create a new vault layout
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Vault root directory
    pub fn root(&self) -> Dir {
        Dir::new(&self.root)
    }

    /// Model files directory
    pub fn models_dir(&self) -> Dir {
        Dir::new(self.root.join("models"))
    }

    /// Resolve a model path; relative paths live under `models/`
    pub fn model_file(&self, model_path: &Path) -> File {
        if model_path.is_absolute() {
            File::new(model_path)
        } else {
            File::new(self.root.join("models").join(model_path))
        }
    }

    /// Service configuration directory
    pub fn configs_dir(&self) -> Dir {
        Dir::new(self.root.join("configs"))
    }

    /// Settings file
    pub fn settings_file(&self) -> File {
        File::new(self.root.join("configs").join("settings.json"))
    }

    /// Writable data directory scoped to one service
    pub fn service_data_dir(&self, service: &str) -> Dir {
        Dir::new(self.root.join("data").join(service))
    }

    /// Read-only config directory scoped to one service
    pub fn service_config_dir(&self, service: &str) -> Dir {
        Dir::new(self.root.join("configs").join(service))
    }

    /// Logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.root.join("logs"))
    }

    /// Deployment records directory
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.root.join("logs").join("deployments"))
    }

    /// Backups directory
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.root.join("backups"))
    }

    /// Setup the vault layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::MeshError> {
        self.models_dir().create().await?;
        self.configs_dir().create().await?;
        self.logs_dir().create().await?;
        self.deployments_dir().create().await?;
        self.backups_dir().create().await?;
        Ok(())
    }
}

impl Default for VaultLayout {
    fn default() -> Self {
        let root = std::env::var_os(VAULT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("vault"));
        Self::new(root)
    }
}
