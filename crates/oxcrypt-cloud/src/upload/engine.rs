//! Concurrent segmented uploads.
//!
//! Segments are uploaded by a bounded pool of tasks. Every segment hashes its
//! bytes while streaming and the digest is checked against the backend's
//! reply. The manifest is committed only after every segment task resolved
//! successfully; any failure or cancellation aborts the remaining tasks and
//! leaves the target untouched.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::checksum::{Checksum, ChecksumReader};
use crate::error::{Result, StorageError};
use crate::features::{Storage, TransferStatus, WriteReply};
use crate::path::{Path, PathAttributes};

use super::config::UploadConfig;
use super::segment::{Manifest, Segment, SegmentService, SegmentState};
use super::source::UploadSource;

/// Result of a segmented upload.
#[derive(Debug, Clone)]
pub struct UploadSummary {
    /// Reply of the manifest commit
    pub reply: WriteReply,
    pub uploaded: usize,
    /// Segments reused from an earlier attempt
    pub reused: usize,
}

pub struct SegmentedUpload<S> {
    storage: S,
    config: UploadConfig,
    segments: SegmentService,
}

impl<S: Storage + Clone + 'static> SegmentedUpload<S> {
    pub fn new(storage: S, config: UploadConfig) -> Self {
        let segments = SegmentService::new(config.segment_size);
        Self {
            storage,
            config,
            segments,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload `source` to `target` as segments plus a manifest.
    ///
    /// With `status.append` set, segments left behind by an earlier attempt
    /// with the same target and length are reused.
    #[instrument(level = "info", skip(self, source, cancel), fields(target = %target, length = status.length, append = status.append))]
    pub async fn upload(
        &self,
        target: &Path,
        source: Arc<dyn UploadSource>,
        status: TransferStatus,
        cancel: &CancellationToken,
    ) -> Result<UploadSummary> {
        if source.len() != status.length {
            return Err(StorageError::Transport(format!(
                "source holds {} bytes but {} were announced for {target}",
                source.len(),
                status.length
            )));
        }

        let mut segments = self.segments.partition(target, status.length)?;
        let reused = if status.append {
            self.reuse_segments(target, status.length, &source, &mut segments)
                .await?
        } else {
            0
        };

        let pending: Vec<usize> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SegmentState::Pending)
            .map(|(position, _)| position)
            .collect();
        debug!(
            total = segments.len(),
            pending = pending.len(),
            reused,
            "Segments partitioned"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        for position in pending.iter().copied() {
            let segment = segments[position].clone();
            let storage = self.storage.clone();
            let source = Arc::clone(&source);
            let semaphore = Arc::clone(&semaphore);
            let verify = self.config.verify_checksum;
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| StorageError::ConnectionCanceled)?;
                let checksum = upload_segment(&storage, source.as_ref(), &segment, verify).await?;
                Ok::<_, StorageError>((position, checksum))
            });
        }

        loop {
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("Upload canceled, aborting outstanding segments");
                    tasks.shutdown().await;
                    return Err(StorageError::ConnectionCanceled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            let failure = match joined {
                Ok(Ok((position, checksum))) => {
                    let segment = &mut segments[position];
                    segment.state = SegmentState::Uploaded;
                    segment.checksum = Some(checksum);
                    trace!(index = segment.index, "Segment uploaded");
                    continue;
                }
                Ok(Err(e)) => e,
                Err(e) if e.is_cancelled() => StorageError::ConnectionCanceled,
                Err(e) => StorageError::Transport(format!("segment task failed: {e}")),
            };
            warn!(error = %failure, "Segment failed, aborting upload");
            tasks.shutdown().await;
            return Err(failure);
        }

        let manifest = Manifest::from_segments(&segments)?;
        let reply = self.storage.commit_manifest(target, &manifest).await?;
        info!(
            segments = manifest.entries.len(),
            uploaded = pending.len(),
            reused,
            "Segmented upload committed"
        );
        Ok(UploadSummary {
            reply,
            uploaded: pending.len(),
            reused,
        })
    }

    /// Mark segments already present under the segment prefix as skipped.
    ///
    /// A remote segment is reused when its name and size match the expected
    /// segment. Its listed checksum fills the manifest; with
    /// `verify_resumed_segments` the local slice must hash to the same value.
    async fn reuse_segments(
        &self,
        target: &Path,
        length: u64,
        source: &Arc<dyn UploadSource>,
        segments: &mut [Segment],
    ) -> Result<usize> {
        let prefix = self.segments.segments_prefix(target, length)?;
        let listed = match self.storage.list(&prefix).await {
            Ok(listed) => listed,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };
        let remote: HashMap<Path, PathAttributes> = listed
            .into_iter()
            .map(|path| {
                let attributes = path.attributes().clone();
                (path, attributes)
            })
            .collect();

        let mut reused = 0;
        for segment in segments.iter_mut() {
            let Some(attributes) = remote.get(&segment.path) else {
                continue;
            };
            if attributes.size != Some(segment.length) {
                debug!(index = segment.index, "Remote segment size differs, re-uploading");
                continue;
            }
            let range = segment.offset..segment.offset + segment.length;
            let checksum = match &attributes.checksum {
                Some(listed) if !self.config.verify_resumed_segments => listed.clone(),
                listed => {
                    let local = source
                        .checksum(range)
                        .await
                        .map_err(|e| StorageError::io(&segment.path, e))?;
                    match listed {
                        Some(listed) if *listed == local => local,
                        None if !self.config.verify_resumed_segments => local,
                        _ => {
                            debug!(index = segment.index, "Remote segment content unverified, re-uploading");
                            continue;
                        }
                    }
                }
            };
            segment.state = SegmentState::Skipped;
            segment.checksum = Some(checksum);
            reused += 1;
        }
        Ok(reused)
    }
}

async fn upload_segment<S: Storage>(
    storage: &S,
    source: &dyn UploadSource,
    segment: &Segment,
    verify: bool,
) -> Result<Checksum> {
    let range = segment.offset..segment.offset + segment.length;
    let stream = source
        .open(range)
        .await
        .map_err(|e| StorageError::io(&segment.path, e))?;
    let reader = ChecksumReader::new(stream);
    let handle = reader.handle();
    let reply = storage
        .write(&segment.path, Box::pin(reader), segment.length)
        .await?;
    let local = handle.finalize();
    if verify && reply.checksum != local {
        return Err(StorageError::checksum(
            &segment.path,
            format!("sent {local}, backend stored {}", reply.checksum),
        ));
    }
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Fault, MemoryStorage};
    use crate::features::Read;
    use bytes::Bytes;

    fn payload(len: usize) -> Bytes {
        (0..len).map(|i| (i % 253) as u8).collect::<Vec<_>>().into()
    }

    fn engine(storage: &MemoryStorage, segment_size: u64) -> SegmentedUpload<MemoryStorage> {
        SegmentedUpload::new(
            storage.clone(),
            UploadConfig::default().segment_size(segment_size).concurrency(3),
        )
    }

    #[tokio::test]
    async fn test_segments_reassemble() {
        let storage = MemoryStorage::new();
        let data = payload(1000);
        let target = Path::file("/c/big.bin");
        let summary = engine(&storage, 64)
            .upload(
                &target,
                Arc::new(data.clone()),
                TransferStatus::new(1000),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.uploaded, 16);
        assert_eq!(summary.reused, 0);
        assert_eq!(summary.reply.checksum, Checksum::sha256(&data));
        assert_eq!(storage.read(&target, None).await.unwrap(), data);
        assert!(storage.contains("/c/.file-segments/big.bin/1000/00000016"));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_blocks_commit() {
        let storage = MemoryStorage::new();
        storage.inject_fault("00000002", Fault::WrongChecksum);
        let err = engine(&storage, 10)
            .upload(
                &Path::file("/c/f"),
                Arc::new(payload(35)),
                TransferStatus::new(35),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Checksum { .. }));
        assert!(!storage.contains("/c/f"));
    }

    #[tokio::test]
    async fn test_length_mismatch() {
        let storage = MemoryStorage::new();
        let err = engine(&storage, 10)
            .upload(
                &Path::file("/c/f"),
                Arc::new(payload(5)),
                TransferStatus::new(6),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Transport(_)));
    }
}
