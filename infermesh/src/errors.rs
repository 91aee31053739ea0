//! Error types for infermesh

use thiserror::Error;

/// Main error type for infermesh
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("precondition missing for {service}: {reason}")]
    PreconditionMissing { service: String, reason: String },

    #[error("build failed for {service}: {reason}")]
    BuildError { service: String, reason: String },

    #[error("run failed for {service}: {reason}")]
    RunError { service: String, reason: String },

    #[error("{service} not healthy after {attempts} attempts: {last_error}")]
    HealthCheckTimeout {
        service: String,
        attempts: u32,
        last_error: String,
    },

    #[error("backup failed: {0}")]
    BackupError(String),

    #[error("restore failed: {0}")]
    RestoreError(String),

    #[error("service unavailable: {service}: {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("upstream error from {service}: {reason}")]
    UpstreamError { service: String, reason: String },

    #[error("Container runtime error: {0}")]
    RuntimeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// Stable failure class name, used in records and CLI exit messages
    pub fn class(&self) -> &'static str {
        match self {
            MeshError::IoError(_) => "IoError",
            MeshError::JsonError(_) => "JsonError",
            MeshError::HttpError(_) => "HttpError",
            MeshError::PreconditionMissing { .. } => "PreconditionMissing",
            MeshError::BuildError { .. } => "BuildError",
            MeshError::RunError { .. } => "RunError",
            MeshError::HealthCheckTimeout { .. } => "HealthCheckTimeout",
            MeshError::BackupError(_) => "BackupError",
            MeshError::RestoreError(_) => "RestoreError",
            MeshError::ServiceUnavailable { .. } => "ServiceUnavailable",
            MeshError::UpstreamError { .. } => "UpstreamError",
            MeshError::RuntimeError(_) => "RuntimeError",
            MeshError::ConfigError(_) => "ConfigError",
            MeshError::Interrupted(_) => "Interrupted",
            MeshError::ServerError(_) => "ServerError",
            MeshError::NotFound(_) => "NotFound",
            MeshError::Internal(_) => "Internal",
        }
    }
}

impl From<anyhow::Error> for MeshError {
    fn from(err: anyhow::Error) -> Self {
        MeshError::Internal(err.to_string())
    }
}
