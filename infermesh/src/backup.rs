//! Vault backups
//!
//! Snapshots of the vault are stored as gzip-compressed tarballs under
//! `vault/backups`, each with a `.sha256` digest sidecar. Retention keeps the
//! newest `keep_last` archives and runs after every successful create.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::MeshError;
use crate::filesys::dir::Dir;
use crate::models::backup::BackupRecord;
use crate::telemetry::available_space;
use crate::utils::hex;

const ARCHIVE_PREFIX: &str = "backup-";
const ARCHIVE_SUFFIX: &str = ".tar.gz";
const DIGEST_SUFFIX: &str = ".sha256";

/// Backup options
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Archives kept by retention
    pub keep_last: usize,

    /// Top-level vault entries left out of snapshots and untouched by restore
    pub exclude: Vec<String>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            keep_last: 5,
            exclude: vec![
                "backups".to_string(),
                "logs".to_string(),
                "models".to_string(),
            ],
        }
    }
}

/// Sort key parsed from an archive id: creation time then collision sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BackupKey {
    created_at: DateTime<Utc>,
    seq: u32,
}

fn format_id(at: DateTime<Utc>, seq: u32) -> String {
    let base = format!(
        "{}{}-{:03}",
        ARCHIVE_PREFIX,
        at.format("%Y%m%d-%H%M%S"),
        at.timestamp_subsec_millis()
    );
    if seq == 0 {
        base
    } else {
        format!("{}-{:03}", base, seq)
    }
}

fn parse_id(id: &str) -> Option<BackupKey> {
    let rest = id.strip_prefix(ARCHIVE_PREFIX)?;
    let mut parts = rest.split('-');
    let date = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(parts.next()?, "%H%M%S").ok()?;
    let millis: u32 = parts.next()?.parse().ok()?;
    let seq: u32 = match parts.next() {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || millis > 999 {
        return None;
    }

    let naive = NaiveDateTime::new(date, time) + chrono::Duration::milliseconds(millis as i64);
    Some(BackupKey {
        created_at: Utc.from_utc_datetime(&naive),
        seq,
    })
}

/// Creates, lists, restores and prunes vault archives
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: Dir,
    options: BackupOptions,
}

impl BackupManager {
    /// Create a manager storing archives in `dir`
    pub fn new(dir: Dir, options: BackupOptions) -> Self {
        Self { dir, options }
    }

    /// Archive directory
    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    pub fn keep_last(&self) -> usize {
        self.options.keep_last
    }

    /// Entries of `root` that snapshots skip
    fn excluded_for(&self, root: &Path) -> HashSet<OsString> {
        let mut excluded: HashSet<OsString> =
            self.options.exclude.iter().map(OsString::from).collect();
        // Never archive the archive directory itself
        if self.dir.path().parent() == Some(root) {
            if let Some(name) = self.dir.path().file_name() {
                excluded.insert(name.to_os_string());
            }
        }
        excluded
    }

    /// Snapshot `source` and apply retention
    pub async fn create(&self, source: &Path) -> Result<BackupRecord, MeshError> {
        let record = self.create_unpruned(source).await?;
        if let Err(e) = self.prune(self.options.keep_last).await {
            warn!("Backup retention failed: {}", e);
        }
        Ok(record)
    }

    /// Snapshot `source` without applying retention
    pub async fn create_unpruned(&self, source: &Path) -> Result<BackupRecord, MeshError> {
        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| MeshError::BackupError(format!("source {} unreadable: {}", source.display(), e)))?;
        if !meta.is_dir() {
            return Err(MeshError::BackupError(format!(
                "source {} is not a directory",
                source.display()
            )));
        }

        self.dir
            .create()
            .await
            .map_err(|e| MeshError::BackupError(format!("cannot create backup dir: {}", e)))?;

        let excluded = self.excluded_for(source);
        let source_buf = source.to_path_buf();
        let needed = {
            let excluded = excluded.clone();
            tokio::task::spawn_blocking(move || tree_size(&source_buf, &excluded))
                .await
                .map_err(|e| MeshError::Internal(e.to_string()))?
                .map_err(|e| MeshError::BackupError(format!("source unreadable: {}", e)))?
        };
        if let Some(free) = available_space(self.dir.path()) {
            if free < needed {
                return Err(MeshError::BackupError(format!(
                    "insufficient disk space: need {} bytes, {} available",
                    needed, free
                )));
            }
        }

        let id = self.next_id(Utc::now()).await;
        let archive = self.dir.path().join(format!("{}{}", id, ARCHIVE_SUFFIX));
        let partial = self.dir.path().join(format!("{}{}.partial", id, ARCHIVE_SUFFIX));

        info!("Creating backup {} of {}", id, source.display());
        let source_buf = source.to_path_buf();
        let archive_buf = archive.clone();
        let partial_buf = partial.clone();
        let digest = tokio::task::spawn_blocking(move || -> io::Result<String> {
            write_archive(&source_buf, &excluded, &partial_buf)?;
            fs::rename(&partial_buf, &archive_buf)?;
            sha256_file(&archive_buf)
        })
        .await
        .map_err(|e| MeshError::Internal(e.to_string()))?;

        let digest = match digest {
            Ok(digest) => digest,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                let _ = tokio::fs::remove_file(&archive).await;
                return Err(MeshError::BackupError(format!("writing archive: {}", e)));
            }
        };

        let file_name = format!("{}{}", id, ARCHIVE_SUFFIX);
        self.dir
            .file(&format!("{}{}", id, DIGEST_SUFFIX))
            .write_atomic(format!("{}  {}\n", digest, file_name).as_bytes())
            .await
            .map_err(|e| MeshError::BackupError(format!("writing digest: {}", e)))?;

        let size_bytes = self.dir.file(&file_name).size().await?;
        let created_at = parse_id(&id).map(|k| k.created_at).unwrap_or_else(Utc::now);
        info!("Backup {} created ({} bytes)", id, size_bytes);

        Ok(BackupRecord {
            id,
            path: archive,
            created_at,
            size_bytes,
            sha256: Some(digest),
        })
    }

    async fn next_id(&self, now: DateTime<Utc>) -> String {
        let mut seq = 0;
        loop {
            let id = format_id(now, seq);
            let taken = self
                .dir
                .file(&format!("{}{}", id, ARCHIVE_SUFFIX))
                .exists()
                .await;
            if !taken {
                return id;
            }
            seq += 1;
        }
    }

    /// All archives, newest first
    pub async fn list(&self) -> Result<Vec<BackupRecord>, MeshError> {
        let mut keyed = Vec::new();
        for path in self.dir.list_files_with_suffix(ARCHIVE_SUFFIX).await? {
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(ARCHIVE_SUFFIX))
                .map(str::to_string)
            else {
                continue;
            };
            let Some(key) = parse_id(&id) else {
                debug!("Skipping foreign archive {}", path.display());
                continue;
            };

            let size_bytes = tokio::fs::metadata(&path).await?.len();
            let sha256 = self.read_digest(&id).await;
            keyed.push((
                key,
                BackupRecord {
                    id,
                    path,
                    created_at: key.created_at,
                    size_bytes,
                    sha256,
                },
            ));
        }

        keyed.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(keyed.into_iter().map(|(_, record)| record).collect())
    }

    async fn read_digest(&self, id: &str) -> Option<String> {
        let contents = self
            .dir
            .file(&format!("{}{}", id, DIGEST_SUFFIX))
            .read_string()
            .await
            .ok()?;
        contents.split_whitespace().next().map(str::to_string)
    }

    /// Most recent archive
    pub async fn latest(&self) -> Result<Option<BackupRecord>, MeshError> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Look an archive up by id
    pub async fn find(&self, id: &str) -> Result<BackupRecord, MeshError> {
        let id = id.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(id);
        self.list()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| MeshError::NotFound(format!("backup {}", id)))
    }

    /// Delete archives beyond the newest `keep_last`, oldest first
    pub async fn prune(&self, keep_last: usize) -> Result<Vec<BackupRecord>, MeshError> {
        // Retention never deletes the newest archive
        let keep_last = keep_last.max(1);
        let mut stale: Vec<BackupRecord> = self.list().await?.into_iter().skip(keep_last).collect();
        stale.reverse();

        for record in &stale {
            info!("Pruning backup {}", record.id);
            tokio::fs::remove_file(&record.path).await?;
            self.dir
                .file(&format!("{}{}", record.id, DIGEST_SUFFIX))
                .delete()
                .await?;
        }
        Ok(stale)
    }

    /// Replace the contents of `target` with the archive.
    ///
    /// The archive is verified against its digest and unpacked to a staging
    /// directory first; `target` is only touched once unpacking succeeded.
    /// Excluded entries of `target` are left alone.
    pub async fn restore(&self, record: &BackupRecord, target: &Path) -> Result<(), MeshError> {
        if !tokio::fs::try_exists(&record.path).await.unwrap_or(false) {
            return Err(MeshError::RestoreError(format!(
                "archive {} missing",
                record.path.display()
            )));
        }

        info!("Restoring backup {} into {}", record.id, target.display());
        let expected = self.read_digest(&record.id).await;
        let staging = self
            .dir
            .path()
            .join(format!(".restore-{}", uuid::Uuid::new_v4()));
        let excluded = self.excluded_for(target);

        let archive = record.path.clone();
        let target_buf = target.to_path_buf();
        let staging_buf = staging.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<(), MeshError> {
            if let Some(expected) = expected {
                let actual = sha256_file(&archive)
                    .map_err(|e| MeshError::RestoreError(format!("reading archive: {}", e)))?;
                if actual != expected {
                    return Err(MeshError::RestoreError(format!(
                        "digest mismatch for {}: expected {}, found {}",
                        archive.display(),
                        expected,
                        actual
                    )));
                }
            }

            unpack_archive(&archive, &staging_buf)
                .map_err(|e| MeshError::RestoreError(format!("unpacking archive: {}", e)))?;
            fs::create_dir_all(&target_buf)?;
            replace_contents(&target_buf, &staging_buf, &excluded)
                .map_err(|e| MeshError::RestoreError(format!("replacing contents: {}", e)))
        })
        .await
        .map_err(|e| MeshError::Internal(e.to_string()))?;

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove staging dir {}: {}", staging.display(), e);
            }
        }

        result?;
        info!("Backup {} restored", record.id);
        Ok(())
    }
}

fn top_level_entries(root: &Path, excluded: &HashSet<OsString>) -> io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !excluded.contains(&entry.file_name()) {
            entries.push(entry.path());
        }
    }
    entries.sort();
    Ok(entries)
}

fn tree_size(root: &Path, excluded: &HashSet<OsString>) -> io::Result<u64> {
    fn walk(path: &Path) -> io::Result<u64> {
        let meta = fs::symlink_metadata(path)?;
        if !meta.is_dir() {
            return Ok(meta.len());
        }
        let mut total = 0;
        for entry in fs::read_dir(path)? {
            total += walk(&entry?.path())?;
        }
        Ok(total)
    }

    let mut total = 0;
    for entry in top_level_entries(root, excluded)? {
        total += walk(&entry)?;
    }
    Ok(total)
}

fn write_archive(source: &Path, excluded: &HashSet<OsString>, dest: &Path) -> io::Result<()> {
    let file = fs::File::create(dest)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for path in top_level_entries(source, excluded)? {
        let name = path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "entry without a name"))?;
        if fs::symlink_metadata(&path)?.is_dir() {
            builder.append_dir_all(&name, &path)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn unpack_archive(archive: &Path, staging: &Path) -> io::Result<()> {
    fs::create_dir_all(staging)?;
    let file = fs::File::open(archive)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive.unpack(staging)
}

fn replace_contents(target: &Path, staging: &Path, excluded: &HashSet<OsString>) -> io::Result<()> {
    for path in top_level_entries(target, excluded)? {
        if fs::symlink_metadata(&path)?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }

    for entry in fs::read_dir(staging)? {
        let entry = entry?;
        fs::rename(entry.path(), target.join(entry.file_name()))?;
    }
    Ok(())
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
