//! Persisted deployment records

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::errors::MeshError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentRecord;

const RECORD_SUFFIX: &str = ".json";

/// Directory of finalized deployment records, one JSON file per attempt
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: Dir,
}

impl RecordStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    /// A deployment id derived from `at` that no stored record uses yet
    pub async fn allocate_id(&self, at: DateTime<Utc>) -> String {
        let base = at.format("%Y%m%d-%H%M%S").to_string();
        let mut id = base.clone();
        let mut n = 1;
        while self.dir.file(&format!("{}{}", id, RECORD_SUFFIX)).exists().await {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        id
    }

    pub async fn save(&self, record: &DeploymentRecord) -> Result<(), MeshError> {
        let file = self
            .dir
            .file(&format!("{}{}", record.deployment_id, RECORD_SUFFIX));
        file.write_json(record).await?;
        info!(
            deployment_id = %record.deployment_id,
            "Deployment record written to {}",
            file.path().display()
        );
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<DeploymentRecord, MeshError> {
        let file = self.dir.file(&format!("{}{}", id, RECORD_SUFFIX));
        if !file.exists().await {
            return Err(MeshError::NotFound(format!("deployment record {}", id)));
        }
        file.read_json().await
    }

    /// Most recently completed record; unreadable files are skipped
    pub async fn latest(&self) -> Result<Option<DeploymentRecord>, MeshError> {
        let mut latest: Option<DeploymentRecord> = None;
        for path in self.dir.list_files_with_suffix(RECORD_SUFFIX).await? {
            let record: DeploymentRecord = match File::new(&path).read_json().await {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable deployment record {}: {}", path.display(), e);
                    continue;
                }
            };
            let newer = latest
                .as_ref()
                .map(|l| record.completed_at > l.completed_at)
                .unwrap_or(true);
            if newer {
                latest = Some(record);
            }
        }
        Ok(latest)
    }
}
