//! Vaults and segmented uploads on a local directory.

use std::sync::Arc;

use bytes::Bytes;
use oxcrypt_cloud::features::{Directory, ListService, Read, TransferStatus, Write, byte_stream};
use oxcrypt_cloud::upload::FileSource;
use oxcrypt_cloud::{EntryType, LocalStorage, Path, Session, UploadConfig};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

mod common;
use common::{PASSPHRASE, init_tracing, payload, test_options};

fn small_segments() -> UploadConfig {
    UploadConfig::default()
        .segment_size(16 * 1024)
        .threshold(32 * 1024)
        .concurrency(3)
}

#[tokio::test]
async fn test_vault_on_local_directory() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let session = Session::new(LocalStorage::new(temp.path()));
    session
        .create_vault(&Path::directory("/c/v"), PASSPHRASE, test_options())
        .await
        .unwrap();

    session.mkdir(&Path::directory("/c/v/notes")).await.unwrap();
    session
        .write(&Path::file("/c/v/notes/todo.txt"), byte_stream(&b"buy milk"[..]), 8)
        .await
        .unwrap();

    assert!(temp.path().join("c/v/vault.cryptomator").is_file());
    assert!(temp.path().join("c/v/masterkey.cryptomator").is_file());
    let on_disk: Vec<_> = walk(temp.path());
    assert!(on_disk.iter().all(|p| !p.contains("todo") && !p.contains("notes")));
    assert!(on_disk.iter().any(|p| p.ends_with(".c9r")));

    session.close();
    let reopened = Session::new(LocalStorage::new(temp.path()));
    reopened
        .unlock_vault(&Path::directory("/c/v"), PASSPHRASE, test_options())
        .await
        .unwrap();
    assert_eq!(
        reopened.read(&Path::file("/c/v/notes/todo.txt"), None).await.unwrap(),
        Bytes::from_static(b"buy milk")
    );

    let roots = reopened.list(&Path::root()).await.unwrap();
    assert_eq!(roots, vec![Path::new("/c", EntryType::Volume)]);
}

#[tokio::test]
async fn test_segmented_upload_into_vault() {
    let temp = TempDir::new().unwrap();
    let session = Session::new(LocalStorage::new(temp.path())).with_upload_config(small_segments());
    session
        .create_vault(&Path::directory("/c/v"), PASSPHRASE, test_options())
        .await
        .unwrap();

    let data = Bytes::from(payload(100_000));
    let target = Path::file("/c/v/archive.tar");
    session
        .upload(
            &target,
            Arc::new(data.clone()),
            TransferStatus::new(data.len() as u64),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(session.read(&target, None).await.unwrap(), data);
    assert_eq!(session.list(&Path::directory("/c/v")).await.unwrap(), vec![target]);
    // segments live outside the vault, next to it in the container
    assert!(temp.path().join("c/.file-segments").is_dir());
}

#[tokio::test]
async fn test_segmented_upload_from_file() {
    let temp = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let data = payload(70_000);
    let source_path = staging.path().join("dump.bin");
    tokio::fs::write(&source_path, &data).await.unwrap();

    let session = Session::new(LocalStorage::new(temp.path())).with_upload_config(small_segments());
    let source = FileSource::new(&source_path).await.unwrap();
    let target = Path::file("/backups/dump.bin");
    let reply = session
        .upload(
            &target,
            Arc::new(source),
            TransferStatus::new(data.len() as u64),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(reply.path, target);
    assert_eq!(std::fs::read(temp.path().join("backups/dump.bin")).unwrap(), data);
    let segments = std::fs::read_dir(temp.path().join("backups/.file-segments/dump.bin/70000"))
        .unwrap()
        .count();
    assert_eq!(segments, 5);
}

fn walk(root: &std::path::Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path.clone());
            }
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_string_lossy().into_owned());
            }
        }
    }
    out
}
