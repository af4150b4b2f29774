//! Segmented uploads against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use oxcrypt_cloud::backend::{Fault, MemoryStorage};
use oxcrypt_cloud::features::{Read, TransferStatus};
use oxcrypt_cloud::upload::{SegmentService, SegmentedUpload, UploadConfig};
use oxcrypt_cloud::{Checksum, ErrorCategory, Path, StorageError};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

mod common;
use common::{init_tracing, payload};

fn config(segment_size: u64) -> UploadConfig {
    UploadConfig::default()
        .segment_size(segment_size)
        .threshold(0)
        .concurrency(4)
}

async fn upload(
    storage: &MemoryStorage,
    config: UploadConfig,
    target: &Path,
    data: &Bytes,
    append: bool,
) -> oxcrypt_cloud::Result<oxcrypt_cloud::upload::UploadSummary> {
    SegmentedUpload::new(storage.clone(), config)
        .upload(
            target,
            Arc::new(data.clone()),
            TransferStatus::new(data.len() as u64).append(append),
            &CancellationToken::new(),
        )
        .await
}

// ============================================================================
// Partitioning and reassembly
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_segment_count_is_ceiling(length in 0u64..10_000, size in 1u64..2_000) {
        let segments = SegmentService::new(size)
            .partition(&Path::file("/c/obj"), length)
            .unwrap();
        prop_assert_eq!(segments.len() as u64, length.div_ceil(size));
        prop_assert_eq!(segments.iter().map(|s| s.length).sum::<u64>(), length);
        for pair in segments.windows(2) {
            prop_assert_eq!(pair[0].offset + pair[0].length, pair[1].offset);
        }
    }
}

#[tokio::test]
async fn test_manifest_reconstructs_payload() {
    init_tracing();
    let storage = MemoryStorage::new();
    let data = Bytes::from(payload(10_001));
    let target = Path::file("/c/big/object.bin");

    let summary = upload(&storage, config(1_000), &target, &data, false)
        .await
        .unwrap();
    assert_eq!(summary.uploaded, 11);
    assert_eq!(summary.reply.checksum, Checksum::sha256(&data));
    assert_eq!(storage.read(&target, None).await.unwrap(), data);
    assert_eq!(
        storage
            .get("/c/.file-segments/big/object.bin/10001/00000011")
            .unwrap()
            .len(),
        1
    );
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resume_reuses_uploaded_segments() {
    let storage = MemoryStorage::new();
    let data = Bytes::from(payload(5_000));
    let target = Path::file("/c/resumable");

    // first attempt loses the last two segments
    storage.inject_fault("00000004", Fault::Unavailable);
    storage.inject_fault("00000005", Fault::Unavailable);
    let err = upload(&storage, config(1_000).concurrency(1), &target, &data, false)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transport);
    assert!(!storage.contains("/c/resumable"));
    storage.clear_faults();

    let writes_before = storage.write_count();
    let summary = upload(&storage, config(1_000), &target, &data, true)
        .await
        .unwrap();
    assert_eq!(summary.reused, 3);
    assert_eq!(summary.uploaded, 2);
    // two segments plus the manifest object
    assert_eq!(storage.write_count() - writes_before, 3);
    assert_eq!(storage.read(&target, None).await.unwrap(), data);
}

#[tokio::test]
async fn test_resume_verification_rejects_stale_segments() {
    let storage = MemoryStorage::new();
    let target = Path::file("/c/changed");
    let old = Bytes::from(vec![1u8; 3_000]);
    upload(&storage, config(1_000), &target, &old, false)
        .await
        .unwrap();

    let new = Bytes::from(vec![2u8; 3_000]);
    let summary = upload(
        &storage,
        config(1_000).verify_resumed_segments(true),
        &target,
        &new,
        true,
    )
    .await
    .unwrap();
    assert_eq!(summary.reused, 0);
    assert_eq!(summary.uploaded, 3);
    assert_eq!(storage.read(&target, None).await.unwrap(), new);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_checksum_mismatch_leaves_no_manifest() {
    let storage = MemoryStorage::new();
    storage.inject_fault("00000003", Fault::WrongChecksum);
    let data = Bytes::from(payload(4_500));
    let target = Path::file("/c/corrupted");

    let err = upload(&storage, config(1_000), &target, &data, false)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Checksum { .. }));
    assert!(!storage.contains("/c/corrupted"));
}

#[tokio::test]
async fn test_cancel_aborts_outstanding_segments() {
    let storage = MemoryStorage::new();
    storage.inject_fault(".file-segments", Fault::Delay(Duration::from_secs(30)));
    let data = Bytes::from(payload(8_000));
    let target = Path::file("/c/slow");
    let cancel = CancellationToken::new();

    let engine = SegmentedUpload::new(storage.clone(), config(1_000));
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        engine.upload(&target, Arc::new(data), TransferStatus::new(8_000), &cancel),
    )
    .await
    .expect("cancellation is prompt")
    .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, StorageError::ConnectionCanceled));
    assert!(!storage.contains("/c/slow"));
}
