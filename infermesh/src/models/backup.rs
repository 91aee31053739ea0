//! Backup models

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One archive owned by the backup manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Archive file stem, e.g. `backup-20261019-101500-042`
    pub id: String,

    /// Archive path
    pub path: PathBuf,

    pub created_at: DateTime<Utc>,

    pub size_bytes: u64,

    /// Hex SHA-256 of the archive, when a digest sidecar exists
    #[serde(default)]
    pub sha256: Option<String>,
}
