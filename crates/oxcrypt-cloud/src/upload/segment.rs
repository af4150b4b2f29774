//! Segment layout and manifests of segmented uploads.
//!
//! A large object is stored as numbered segment objects under
//! `<container>/.file-segments/<key>/<total length>/<index:08>` and a manifest
//! object at the target path listing them in byte order. Segment names only
//! depend on the target and its total length, which is what lets an
//! interrupted upload find its earlier segments again.

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::{Result, StorageError};
use crate::path::Path;

pub const SEGMENTS_DIRECTORY: &str = ".file-segments";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    Uploaded,
    /// Already present remotely from an earlier attempt
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Segment {
    /// 1-based position in the manifest
    pub index: u32,
    pub offset: u64,
    pub length: u64,
    pub path: Path,
    pub state: SegmentState,
    pub checksum: Option<Checksum>,
}

impl Segment {
    pub fn is_terminal(&self) -> bool {
        self.state != SegmentState::Pending && self.checksum.is_some()
    }
}

/// Computes segment names and partitions.
#[derive(Debug, Clone, Copy)]
pub struct SegmentService {
    segment_size: u64,
}

impl SegmentService {
    pub fn new(segment_size: u64) -> Self {
        Self {
            segment_size: segment_size.max(1),
        }
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Directory holding the segments of `file` uploaded with `length` bytes.
    pub fn segments_prefix(&self, file: &Path, length: u64) -> Result<Path> {
        let (container, key) = file.container().zip(file.key()).ok_or_else(|| {
            StorageError::Unsupported(format!(
                "segmented upload of {file} requires a path below a container"
            ))
        })?;
        Ok(Path::directory(format!(
            "{}/{SEGMENTS_DIRECTORY}/{key}/{length}",
            container.as_str()
        )))
    }

    pub fn segment_path(&self, prefix: &Path, index: u32) -> Path {
        Path::file(format!("{}/{index:08}", prefix.as_str()))
    }

    /// Split `length` bytes into `ceil(length / segment_size)` pending segments.
    ///
    /// Fails when the segments could not all be numbered with a `u32`.
    pub fn partition(&self, file: &Path, length: u64) -> Result<Vec<Segment>> {
        let count = length.div_ceil(self.segment_size);
        if u32::try_from(count).is_err() {
            return Err(StorageError::Unsupported(format!(
                "{length} bytes of {file} need {count} segments of {} bytes, more than {}",
                self.segment_size,
                u32::MAX
            )));
        }
        let prefix = self.segments_prefix(file, length)?;
        let mut segments = Vec::new();
        let mut offset = 0;
        let mut index = 1u32;
        while offset < length {
            let segment_length = self.segment_size.min(length - offset);
            segments.push(Segment {
                index,
                offset,
                length: segment_length,
                path: self.segment_path(&prefix, index),
                state: SegmentState::Pending,
                checksum: None,
            });
            offset += segment_length;
            index += 1;
        }
        Ok(segments)
    }
}

/// One manifest line: a segment object and its checksum and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Absolute path of the segment object, container first
    pub path: String,
    pub etag: String,
    pub size_bytes: u64,
}

/// Ordered list of segments making up one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build from segments that all reached a terminal state, in byte order.
    pub fn from_segments(segments: &[Segment]) -> Result<Self> {
        let mut sorted: Vec<&Segment> = segments.iter().collect();
        sorted.sort_by_key(|s| s.index);

        let entries = sorted
            .into_iter()
            .map(|segment| match (&segment.checksum, segment.is_terminal()) {
                (Some(checksum), true) => Ok(ManifestEntry {
                    path: segment.path.absolute(),
                    etag: checksum.hash.clone(),
                    size_bytes: segment.length,
                }),
                _ => Err(StorageError::Transport(format!(
                    "segment {} did not complete",
                    segment.index
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Manifest { entries })
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| StorageError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_count_and_layout() {
        let service = SegmentService::new(10);
        let file = Path::file("/bucket/dir/big.bin");
        let segments = service.partition(&file, 35).unwrap();

        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].path.absolute(), "/bucket/.file-segments/dir/big.bin/35/00000001");
        assert_eq!(segments[3].offset, 30);
        assert_eq!(segments[3].length, 5);
        assert_eq!(segments.iter().map(|s| s.length).sum::<u64>(), 35);

        assert_eq!(service.partition(&file, 30).unwrap().len(), 3);
        assert!(service.partition(&file, 0).unwrap().is_empty());
    }

    #[test]
    fn test_partition_requires_key() {
        let service = SegmentService::new(10);
        assert!(matches!(
            service.partition(&Path::directory("/bucket"), 5),
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn test_partition_rejects_unnumberable_segment_count() {
        let service = SegmentService::new(1);
        let file = Path::file("/c/huge");
        assert!(matches!(
            service.partition(&file, u64::from(u32::MAX) + 1),
            Err(StorageError::Unsupported(_))
        ));
        assert!(matches!(
            SegmentService::new(1024).partition(&file, u64::MAX),
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn test_manifest_order_and_json() {
        let service = SegmentService::new(4);
        let mut segments = service.partition(&Path::file("/c/k"), 6).unwrap();
        for segment in &mut segments {
            segment.state = SegmentState::Uploaded;
            segment.checksum = Some(Checksum::sha256(&[segment.index as u8]));
        }
        segments.reverse();

        let manifest = Manifest::from_segments(&segments).unwrap();
        assert_eq!(manifest.entries[0].path, "/c/.file-segments/k/6/00000001");
        assert_eq!(manifest.total_size(), 6);

        let json = manifest.to_json().unwrap();
        assert!(json.starts_with("[{\"path\":\"/c/.file-segments/k/6/00000001\""));
        assert!(json.contains("\"size_bytes\":4"));
    }

    #[test]
    fn test_manifest_rejects_pending() {
        let service = SegmentService::new(4);
        let segments = service.partition(&Path::file("/c/k"), 6).unwrap();
        assert!(Manifest::from_segments(&segments).is_err());
    }
}
