//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backup::BackupOptions;
use crate::deploy::fsm::FsmSettings;
use crate::errors::MeshError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::service::ServiceSpec;
use crate::registry::default_catalog;

/// infermesh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Container runtime configuration
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Health check configuration
    #[serde(default)]
    pub health: HealthSettings,

    /// Router configuration
    #[serde(default)]
    pub router: RouterSettings,

    /// Backup configuration
    #[serde(default)]
    pub backup: BackupSettings,

    /// Rollback policy
    #[serde(default)]
    pub rollback: RollbackSettings,

    /// Services in deployment order
    #[serde(default = "default_catalog")]
    pub services: Vec<ServiceSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            runtime: RuntimeSettings::default(),
            health: HealthSettings::default(),
            router: RouterSettings::default(),
            backup: BackupSettings::default(),
            rollback: RollbackSettings::default(),
            services: default_catalog(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub async fn load(file: &File) -> Result<Self, MeshError> {
        file.read_json::<Settings>()
            .await
            .map_err(|e| MeshError::ConfigError(format!("{}: {}", file.path().display(), e)))
    }

    /// Load settings from a JSON file, or defaults when it does not exist
    pub async fn load_or_default(file: &File) -> Result<Self, MeshError> {
        if file.exists().await {
            Self::load(file).await
        } else {
            Ok(Self::default())
        }
    }

    /// FSM settings derived from the health configuration
    pub fn fsm_settings(&self) -> FsmSettings {
        FsmSettings {
            health_attempts: self.health.attempts,
            health_interval: Duration::from_millis(self.health.interval_ms),
        }
    }

    /// Backup options
    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            keep_last: self.backup.keep_last,
            exclude: self.backup.exclude.clone(),
        }
    }
}

/// Container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Runtime binary
    #[serde(default = "default_runtime_binary")]
    pub binary: String,

    /// Shared network name
    #[serde(default = "default_network")]
    pub network: String,

    /// Host address ports are published on
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Prefix for generated image names
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    /// Directory holding per-service build contexts
    #[serde(default = "default_build_root")]
    pub build_root: PathBuf,

    /// Restart policy for started containers
    #[serde(default = "default_restart_policy")]
    pub restart_policy: Option<String>,

    /// Prefix of systemd units that may also run the services
    #[serde(default)]
    pub unit_prefix: Option<String>,
}

fn default_runtime_binary() -> String {
    "docker".to_string()
}

fn default_network() -> String {
    "infermesh".to_string()
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_image_prefix() -> String {
    "infermesh/".to_string()
}

fn default_build_root() -> PathBuf {
    PathBuf::from("services")
}

fn default_restart_policy() -> Option<String> {
    Some("unless-stopped".to_string())
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            binary: default_runtime_binary(),
            network: default_network(),
            bind_host: default_bind_host(),
            image_prefix: default_image_prefix(),
            build_root: default_build_root(),
            restart_policy: default_restart_policy(),
            unit_prefix: None,
        }
    }
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Attempts before a deploying service is declared unhealthy
    #[serde(default = "default_health_attempts")]
    pub attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_health_attempts() -> u32 {
    30
}

fn default_health_interval_ms() -> u64 {
    2000
}

fn default_health_timeout_ms() -> u64 {
    2000
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            attempts: default_health_attempts(),
            interval_ms: default_health_interval_ms(),
            timeout_ms: default_health_timeout_ms(),
        }
    }
}

/// Router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Host the router server binds to
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Port the router server listens on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Host used to reach workers; `None` means by service name on the
    /// shared network
    #[serde(default = "default_worker_host")]
    pub worker_host: Option<String>,

    /// Timeout of the single pre-forward health probe in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Timeout of the forwarded completion call in seconds
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// Default token budget for completions
    #[serde(default = "default_n_predict")]
    pub n_predict: i32,
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_worker_host() -> Option<String> {
    Some("127.0.0.1".to_string())
}

fn default_probe_timeout_ms() -> u64 {
    1500
}

fn default_upstream_timeout_secs() -> u64 {
    120
}

fn default_n_predict() -> i32 {
    512
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            worker_host: default_worker_host(),
            probe_timeout_ms: default_probe_timeout_ms(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            n_predict: default_n_predict(),
        }
    }
}

/// Backup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Archives kept by retention
    #[serde(default = "default_keep_last")]
    pub keep_last: usize,

    /// Top-level vault entries excluded from snapshots
    #[serde(default = "default_backup_exclude")]
    pub exclude: Vec<String>,
}

fn default_keep_last() -> usize {
    5
}

fn default_backup_exclude() -> Vec<String> {
    BackupOptions::default().exclude
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            keep_last: default_keep_last(),
            exclude: default_backup_exclude(),
        }
    }
}

/// Rollback policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSettings {
    /// Restore the pre-deployment vault backup on full-run rollback
    #[serde(default = "default_true")]
    pub restore_vault: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self {
            restore_vault: true,
        }
    }
}
