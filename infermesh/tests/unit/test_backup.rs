//! Backup manager tests

mod common;

use std::fs;
use std::path::Path;

use flate2::read::GzDecoder;

use common::snapshot;
use infermesh::backup::{BackupManager, BackupOptions};
use infermesh::errors::MeshError;
use infermesh::filesys::dir::Dir;

const VAULT_OWNED: [&str; 3] = ["backups", "logs", "models"];

fn seed_vault(root: &Path) {
    fs::create_dir_all(root.join("configs/coder")).unwrap();
    fs::create_dir_all(root.join("data/agent/notes")).unwrap();
    fs::create_dir_all(root.join("models")).unwrap();
    fs::create_dir_all(root.join("logs")).unwrap();
    fs::write(root.join("configs/coder/app.toml"), b"threads = 8\n").unwrap();
    fs::write(root.join("data/agent/notes/today.md"), b"# notes\n").unwrap();
    fs::write(root.join("data/agent/blob.bin"), (0u8..=255).collect::<Vec<u8>>()).unwrap();
    fs::write(root.join("models/coder.gguf"), b"weights-v1").unwrap();
    fs::write(root.join("logs/infermesh.log"), b"started\n").unwrap();
}

fn manager(root: &Path, keep_last: usize) -> BackupManager {
    BackupManager::new(
        Dir::new(root.join("backups")),
        BackupOptions {
            keep_last,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_retention_keeps_newest_five_of_seven() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("vault");
    seed_vault(&root);
    let backups = manager(&root, 5);

    let mut created = Vec::new();
    for _ in 0..7 {
        created.push(backups.create(&root).await.unwrap().id);
    }

    let listed: Vec<String> = backups.list().await.unwrap().into_iter().map(|r| r.id).collect();
    let mut expected: Vec<String> = created[2..].to_vec();
    expected.reverse();
    assert_eq!(listed, expected);

    let sidecars = fs::read_dir(root.join("backups"))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".sha256"))
        .count();
    assert_eq!(sidecars, 5);
}

#[tokio::test]
async fn test_prune_never_removes_the_newest() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("vault");
    seed_vault(&root);
    let backups = manager(&root, 5);

    backups.create(&root).await.unwrap();
    let newest = backups.create(&root).await.unwrap();

    let removed = backups.prune(0).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(backups.latest().await.unwrap().unwrap().id, newest.id);
}

#[tokio::test]
async fn test_restore_is_byte_for_byte() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("vault");
    seed_vault(&root);
    let backups = manager(&root, 5);
    let before = snapshot(&root, &VAULT_OWNED);

    let record = backups.create(&root).await.unwrap();
    assert!(record.sha256.is_some());
    assert!(record.size_bytes > 0);

    fs::write(root.join("data/agent/blob.bin"), b"overwritten").unwrap();
    fs::remove_file(root.join("configs/coder/app.toml")).unwrap();
    fs::create_dir_all(root.join("data/vision")).unwrap();
    fs::write(root.join("data/vision/state.txt"), b"new").unwrap();
    fs::write(root.join("stray.txt"), b"stray").unwrap();
    fs::write(root.join("models/coder.gguf"), b"weights-v2").unwrap();

    backups.restore(&record, &root).await.unwrap();

    assert_eq!(snapshot(&root, &VAULT_OWNED), before);
    // Excluded entries are left alone
    assert_eq!(fs::read(root.join("models/coder.gguf")).unwrap(), b"weights-v2");
    assert!(root.join("logs/infermesh.log").exists());
    assert!(root.join("backups").join(format!("{}.tar.gz", record.id)).exists());
}

#[tokio::test]
async fn test_archive_leaves_out_excluded_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("vault");
    seed_vault(&root);
    let backups = manager(&root, 5);

    let record = backups.create(&root).await.unwrap();

    let file = fs::File::open(&record.path).unwrap();
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let paths: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect();

    assert!(paths.iter().any(|p| p.starts_with("configs")));
    assert!(paths.iter().any(|p| p.starts_with("data")));
    for owned in VAULT_OWNED {
        assert!(!paths.iter().any(|p| p.starts_with(owned)), "{} archived", owned);
    }
}

#[tokio::test]
async fn test_digest_mismatch_leaves_vault_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("vault");
    seed_vault(&root);
    let backups = manager(&root, 5);

    let record = backups.create(&root).await.unwrap();
    fs::write(
        root.join("backups").join(format!("{}.sha256", record.id)),
        format!("{}  {}.tar.gz\n", "0".repeat(64), record.id),
    )
    .unwrap();
    fs::write(root.join("stray.txt"), b"stray").unwrap();

    let err = backups.restore(&record, &root).await.unwrap_err();
    assert!(matches!(err, MeshError::RestoreError(_)), "{:?}", err);
    assert!(err.to_string().contains("digest mismatch"));
    assert!(root.join("stray.txt").exists());

    let leftovers: Vec<String> = fs::read_dir(root.join("backups"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(".restore-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_missing_source_is_backup_error() {
    let tmp = tempfile::tempdir().unwrap();
    let backups = manager(tmp.path(), 5);

    let err = backups.create(&tmp.path().join("nope")).await.unwrap_err();
    assert_eq!(err.class(), "BackupError");
}

#[tokio::test]
async fn test_find() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("vault");
    seed_vault(&root);
    let backups = manager(&root, 5);
    assert!(backups.list().await.unwrap().is_empty());

    let record = backups.create(&root).await.unwrap();
    assert_eq!(backups.find(&record.id).await.unwrap(), record);
    assert_eq!(
        backups.find(&format!("{}.tar.gz", record.id)).await.unwrap().id,
        record.id
    );
    assert!(matches!(
        backups.find("backup-20000101-000000-000").await,
        Err(MeshError::NotFound(_))
    ));
}
