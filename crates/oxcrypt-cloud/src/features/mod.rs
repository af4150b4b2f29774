//! Operation capabilities.
//!
//! Each capability is a small async trait with one implementation per
//! backend. The vault decorators in [`crypto`] implement the same traits by
//! wrapping a backend, so callers never need to know whether a path is
//! encrypted. [`Storage`] bundles the full set.

pub mod crypto;

use std::ops::Range;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::checksum::Checksum;
use crate::error::Result;
use crate::path::{Path, PathAttributes};
use crate::upload::Manifest;

/// Payload of a write.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Wrap an in-memory buffer as a [`ByteStream`].
pub fn byte_stream(data: impl Into<Bytes>) -> ByteStream {
    Box::pin(std::io::Cursor::new(data.into()))
}

/// Committed object reference returned by writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReply {
    pub path: Path,
    /// Checksum the backend computed over the bytes it stored
    pub checksum: Checksum,
}

/// Parameters of a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStatus {
    pub length: u64,
    /// Resume a previously interrupted transfer
    pub append: bool,
}

impl TransferStatus {
    pub fn new(length: u64) -> Self {
        Self {
            length,
            append: false,
        }
    }

    #[must_use]
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Create a directory. Missing parents are created by backends that
    /// have implicit directories.
    async fn mkdir(&self, path: &Path) -> Result<Path>;
}

#[async_trait]
pub trait Move: Send + Sync {
    /// Move `source` to `target`. An existing target is replaced only when
    /// `overwrite` is set, otherwise the move fails with `Conflict`.
    async fn move_to(&self, source: &Path, target: &Path, overwrite: bool) -> Result<Path>;
}

#[async_trait]
pub trait Delete: Send + Sync {
    /// Delete every path, collecting failures into `PartialDelete`.
    async fn delete(&self, paths: &[Path]) -> Result<()>;
}

#[async_trait]
pub trait Find: Send + Sync {
    /// Whether an entry of the path's type exists. Absence is not an error.
    async fn find(&self, path: &Path) -> Result<bool>;
}

#[async_trait]
pub trait AttributesFinder: Send + Sync {
    async fn attributes(&self, path: &Path) -> Result<PathAttributes>;

    /// Like [`attributes`](Self::attributes), with absence as `None`.
    async fn find_attributes(&self, path: &Path) -> Result<Option<PathAttributes>> {
        match self.attributes(path).await {
            Ok(attributes) => Ok(Some(attributes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
pub trait Write: Send + Sync {
    /// Store exactly `length` bytes from `stream` at `path`.
    async fn write(&self, path: &Path, stream: ByteStream, length: u64) -> Result<WriteReply>;
}

#[async_trait]
pub trait Read: Send + Sync {
    /// Read the object, or the part of it within `range` (clamped to its size).
    async fn read(&self, path: &Path, range: Option<Range<u64>>) -> Result<Bytes>;
}

#[async_trait]
pub trait ListService: Send + Sync {
    /// Direct children of `directory`, ordered by path.
    async fn list(&self, directory: &Path) -> Result<Vec<Path>>;
}

#[async_trait]
pub trait ManifestWriter: Send + Sync {
    /// Commit `manifest` as a single object at `target`.
    async fn commit_manifest(&self, target: &Path, manifest: &Manifest) -> Result<WriteReply>;
}

/// The full capability set of a backend.
pub trait Storage:
    Directory + Move + Delete + Find + AttributesFinder + Write + Read + ListService + ManifestWriter
{
}

impl<T> Storage for T where
    T: Directory
        + Move
        + Delete
        + Find
        + AttributesFinder
        + Write
        + Read
        + ListService
        + ManifestWriter
{
}

pub(crate) fn clamp_range(range: Option<Range<u64>>, len: u64) -> Range<u64> {
    match range {
        Some(r) => r.start.min(len)..r.end.min(len).max(r.start.min(len)),
        None => 0..len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(None, 10), 0..10);
        assert_eq!(clamp_range(Some(2..5), 10), 2..5);
        assert_eq!(clamp_range(Some(8..50), 10), 8..10);
        assert_eq!(clamp_range(Some(20..30), 10), 10..10);
    }

    #[test]
    fn test_transfer_status() {
        let status = TransferStatus::new(42).append(true);
        assert_eq!(status.length, 42);
        assert!(status.append);
    }
}
