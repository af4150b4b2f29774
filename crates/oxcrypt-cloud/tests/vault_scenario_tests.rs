//! End-to-end vault behavior through a [`Session`].
//!
//! ```bash
//! cargo test -p oxcrypt-cloud --test vault_scenario_tests
//! ```

use bytes::Bytes;
use oxcrypt_cloud::features::{
    AttributesFinder, Delete, Directory, Find, ListService, Move, Read, Write, byte_stream,
};
use oxcrypt_cloud::vault::IdMode;
use oxcrypt_cloud::{ErrorCategory, MemoryStorage, Path, Session, StorageError};

mod common;
use common::{PASSPHRASE, init_tracing, payload, session_with_vault, test_options};

// ============================================================================
// Create, rename, rename parent
// ============================================================================

#[tokio::test]
async fn test_create_rename_and_move_directory() {
    init_tracing();
    let storage = MemoryStorage::new();
    let session = Session::new(storage.clone());
    let vault = session
        .create_vault(&Path::directory("/v"), PASSPHRASE, test_options())
        .await
        .unwrap();

    session.mkdir(&Path::directory("/v/a")).await.unwrap();
    session
        .write(&Path::file("/v/a/f"), byte_stream(Bytes::new()), 0)
        .await
        .unwrap();
    assert!(session.find(&Path::file("/v/a/f")).await.unwrap());

    session
        .move_to(&Path::file("/v/a/f"), &Path::file("/v/a/g"), false)
        .await
        .unwrap();
    assert!(!session.find(&Path::file("/v/a/f")).await.unwrap());
    assert!(session.find(&Path::file("/v/a/g")).await.unwrap());

    let id_before = vault
        .directory_id(session.backend(), &Path::directory("/v/a"), IdMode::Read)
        .await
        .unwrap();
    let g_before = vault
        .resolve(session.backend(), &Path::file("/v/a/g"), IdMode::Read)
        .await
        .unwrap();

    session
        .move_to(&Path::directory("/v/a"), &Path::directory("/v/b"), false)
        .await
        .unwrap();
    assert!(session.find(&Path::file("/v/b/g")).await.unwrap());
    assert!(!session.find(&Path::directory("/v/a")).await.unwrap());

    let id_after = vault
        .directory_id(session.backend(), &Path::directory("/v/b"), IdMode::Read)
        .await
        .unwrap();
    let g_after = vault
        .resolve(session.backend(), &Path::file("/v/b/g"), IdMode::Read)
        .await
        .unwrap();
    assert_eq!(id_before, id_after);
    assert_eq!(g_before.node, g_after.node);

    // nothing readable leaks into the backend
    assert!(storage.keys().iter().all(|k| !k.ends_with("/a") && !k.ends_with("/g")));
}

#[tokio::test]
async fn test_state_survives_relock() {
    let (storage, session) = session_with_vault(test_options()).await;
    session.mkdir(&Path::directory("/c/v/docs")).await.unwrap();
    let data = payload(70_000);
    session
        .write(
            &Path::file("/c/v/docs/report.pdf"),
            byte_stream(data.clone()),
            data.len() as u64,
        )
        .await
        .unwrap();
    session.close();

    let reopened = Session::new(storage);
    reopened
        .unlock_vault(&Path::directory("/c/v"), PASSPHRASE, test_options())
        .await
        .unwrap();
    let listed = reopened.list(&Path::directory("/c/v/docs")).await.unwrap();
    assert_eq!(listed, vec![Path::file("/c/v/docs/report.pdf")]);
    assert_eq!(listed[0].attributes().size, Some(70_000));
    assert_eq!(
        reopened
            .read(&Path::file("/c/v/docs/report.pdf"), Some(65_530..65_540))
            .await
            .unwrap(),
        &data[65_530..65_540]
    );
}

// ============================================================================
// Long names
// ============================================================================

#[tokio::test]
async fn test_long_names_round_trip() {
    let (storage, session) = session_with_vault(test_options()).await;
    let long_dir = "d".repeat(130);
    let long_file = "f".repeat(130);
    let dir = Path::directory(format!("/c/v/{long_dir}"));
    let file = Path::file(format!("/c/v/{long_dir}/{long_file}"));

    session.mkdir(&dir).await.unwrap();
    session
        .write(&file, byte_stream(&b"long"[..]), 4)
        .await
        .unwrap();

    assert!(session.find(&dir).await.unwrap());
    assert!(session.find(&file).await.unwrap());
    assert_eq!(session.list(&Path::directory("/c/v")).await.unwrap(), vec![dir.clone()]);
    assert_eq!(session.list(&dir).await.unwrap(), vec![file.clone()]);
    assert_eq!(session.attributes(&file).await.unwrap().size, Some(4));
    assert!(storage.keys().iter().any(|k| k.ends_with(".c9s/name.c9s")));

    // shortened to short and back
    let short = Path::file(format!("/c/v/{long_dir}/short"));
    session.move_to(&file, &short, false).await.unwrap();
    assert!(!session.find(&file).await.unwrap());
    assert_eq!(session.read(&short, None).await.unwrap(), Bytes::from_static(b"long"));
    session.move_to(&short, &file, false).await.unwrap();
    assert_eq!(session.read(&file, None).await.unwrap(), Bytes::from_static(b"long"));
}

// ============================================================================
// Delete and conflicts
// ============================================================================

#[tokio::test]
async fn test_delete_tree_bottom_up() {
    let (storage, session) = session_with_vault(test_options()).await;
    session.mkdir(&Path::directory("/c/v/a")).await.unwrap();
    session.mkdir(&Path::directory("/c/v/a/b")).await.unwrap();
    session
        .write(&Path::file("/c/v/a/b/f"), byte_stream(&b"x"[..]), 1)
        .await
        .unwrap();
    let objects_with_tree = storage.object_count();

    let err = session
        .delete(&[Path::directory("/c/v/a")])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::PartialDelete(_)));

    session
        .delete(&[
            Path::directory("/c/v/a"),
            Path::file("/c/v/a/b/f"),
            Path::directory("/c/v/a/b"),
        ])
        .await
        .unwrap();
    assert!(!session.find(&Path::directory("/c/v/a")).await.unwrap());
    assert!(session.list(&Path::directory("/c/v")).await.unwrap().is_empty());
    assert!(storage.object_count() < objects_with_tree);
}

#[tokio::test]
async fn test_write_conflicts() {
    let (_storage, session) = session_with_vault(test_options()).await;
    session.mkdir(&Path::directory("/c/v/x")).await.unwrap();

    let err = session
        .write(&Path::file("/c/v/x"), byte_stream(&b"1"[..]), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));

    let err = session.mkdir(&Path::directory("/c/v/x")).await.unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }));

    session
        .write(&Path::file("/c/v/y"), byte_stream(&b"1"[..]), 1)
        .await
        .unwrap();
    let err = session
        .move_to(&Path::file("/c/v/y"), &Path::directory("/c/v/x"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));
}

#[tokio::test]
async fn test_short_stream_with_oversized_length() {
    let (_storage, session) = session_with_vault(test_options()).await;

    let err = session
        .write(&Path::file("/c/v/huge.bin"), byte_stream(&b"only a few bytes"[..]), 1u64 << 60)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transport);
    assert!(!session.find(&Path::file("/c/v/huge.bin")).await.unwrap());
    assert!(session.list(&Path::directory("/c/v")).await.unwrap().is_empty());
}
