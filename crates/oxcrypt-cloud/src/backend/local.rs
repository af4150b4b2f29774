//! Local directory tree backend.
//!
//! Maps every path to a file or directory below a root directory. Writes go
//! to a temporary sibling first and are renamed into place, so readers never
//! see a partially written object.

use std::io;
use std::ops::Range;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, instrument, trace, warn};

use crate::checksum::{Checksum, ChecksumReader};
use crate::error::{DeleteFailure, Result, StorageError};
use crate::features::{
    AttributesFinder, ByteStream, Delete, Directory, Find, ListService, ManifestWriter, Move, Read,
    Write, WriteReply,
};
use crate::path::{EntryType, Path, PathAttributes};
use crate::upload::Manifest;

const TEMP_PREFIX: &str = ".tmp.";

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

fn map_io(path: &Path, err: io::Error) -> StorageError {
    match err.kind() {
        io::ErrorKind::NotFound => StorageError::not_found(path),
        io::ErrorKind::AlreadyExists => StorageError::already_exists(path),
        io::ErrorKind::PermissionDenied => StorageError::Forbidden {
            path: path.to_string(),
            reason: err.to_string(),
        },
        io::ErrorKind::DirectoryNotEmpty => StorageError::conflict(path, "directory not empty"),
        _ => StorageError::io(path, err),
    }
}

fn attributes_of(metadata: &std::fs::Metadata) -> PathAttributes {
    let mut attributes = PathAttributes::default();
    if metadata.is_file() {
        attributes = attributes.with_size(metadata.len());
    }
    if let Ok(modified) = metadata.modified() {
        attributes = attributes.with_modified(modified);
    }
    attributes
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Filesystem location of `path`. Relative components are refused.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for segment in path.segments() {
            if segment == ".." || segment == "." {
                return Err(StorageError::Forbidden {
                    path: path.to_string(),
                    reason: "relative path components are not allowed".to_string(),
                });
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }

    async fn metadata(&self, path: &Path) -> Result<Option<std::fs::Metadata>> {
        match fs::metadata(self.resolve(path)?).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_io(path, e)),
        }
    }

    async fn create_parent(&self, path: &Path, target: &std::path::Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| map_io(path, e))?;
        }
        Ok(())
    }

    /// Write `stream` to a temporary sibling, then rename it over `path`.
    async fn write_atomic(&self, path: &Path, stream: ByteStream, length: u64) -> Result<Checksum> {
        let target = self.resolve(path)?;
        if fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
            return Err(StorageError::conflict(path, "a directory exists at this path"));
        }
        self.create_parent(path, &target).await?;
        let temp = target.with_file_name(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()));

        let mut reader = ChecksumReader::new(stream.take(length));
        let handle = reader.handle();
        let result = async {
            let mut file = fs::File::create(&temp).await?;
            let written = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            file.sync_data().await?;
            Ok::<_, io::Error>(written)
        }
        .await;

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(map_io(path, e));
            }
        };
        if written != length {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::Transport(format!(
                "short write to {path}: expected {length} bytes, got {written}"
            )));
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(map_io(path, e));
        }
        Ok(handle.finalize())
    }
}

#[async_trait]
impl Directory for LocalStorage {
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    async fn mkdir(&self, path: &Path) -> Result<Path> {
        if self.metadata(path).await?.is_some() {
            return Err(StorageError::already_exists(path));
        }
        fs::create_dir_all(self.resolve(path)?)
            .await
            .map_err(|e| map_io(path, e))?;
        Ok(path.clone())
    }
}

#[async_trait]
impl Move for LocalStorage {
    #[instrument(level = "debug", skip(self), fields(source = %source, target = %target))]
    async fn move_to(&self, source: &Path, target: &Path, overwrite: bool) -> Result<Path> {
        let from = self.resolve(source)?;
        let to = self.resolve(target)?;
        if to.starts_with(&from) {
            return Err(StorageError::conflict(target, "cannot move onto itself or into itself"));
        }
        if self.metadata(source).await?.is_none() {
            return Err(StorageError::not_found(source));
        }
        if let Some(existing) = self.metadata(target).await? {
            if !overwrite {
                return Err(StorageError::conflict(target, "target exists"));
            }
            let removed = if existing.is_dir() {
                fs::remove_dir_all(&to).await
            } else {
                fs::remove_file(&to).await
            };
            removed.map_err(|e| map_io(target, e))?;
        }
        self.create_parent(target, &to).await?;
        fs::rename(&from, &to).await.map_err(|e| map_io(source, e))?;
        Ok(target.clone())
    }
}

#[async_trait]
impl Delete for LocalStorage {
    #[instrument(level = "debug", skip(self, paths), fields(count = paths.len()))]
    async fn delete(&self, paths: &[Path]) -> Result<()> {
        let mut failures = Vec::new();
        for path in paths {
            let result = async {
                let location = self.resolve(path)?;
                let metadata = fs::metadata(&location)
                    .await
                    .map_err(|e| map_io(path, e))?;
                let removed = if metadata.is_dir() {
                    fs::remove_dir(&location).await
                } else {
                    fs::remove_file(&location).await
                };
                removed.map_err(|e| map_io(path, e))
            }
            .await;
            if let Err(error) = result {
                failures.push(DeleteFailure {
                    path: path.absolute(),
                    error,
                });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::PartialDelete(failures))
        }
    }
}

#[async_trait]
impl Find for LocalStorage {
    async fn find(&self, path: &Path) -> Result<bool> {
        Ok(self
            .metadata(path)
            .await?
            .is_some_and(|m| m.is_dir() == path.is_directory()))
    }
}

#[async_trait]
impl AttributesFinder for LocalStorage {
    async fn attributes(&self, path: &Path) -> Result<PathAttributes> {
        match self.metadata(path).await? {
            Some(metadata) if metadata.is_dir() == path.is_directory() => Ok(attributes_of(&metadata)),
            _ => Err(StorageError::not_found(path)),
        }
    }
}

#[async_trait]
impl Write for LocalStorage {
    #[instrument(level = "debug", skip(self, stream), fields(path = %path))]
    async fn write(&self, path: &Path, stream: ByteStream, length: u64) -> Result<WriteReply> {
        let checksum = self.write_atomic(path, stream, length).await?;
        trace!(%checksum, "Object written");
        Ok(WriteReply {
            path: path.clone().with_kind(EntryType::File),
            checksum,
        })
    }
}

#[async_trait]
impl Read for LocalStorage {
    async fn read(&self, path: &Path, range: Option<Range<u64>>) -> Result<Bytes> {
        let location = self.resolve(path)?;
        let mut file = fs::File::open(&location).await.map_err(|e| map_io(path, e))?;
        let length = file.metadata().await.map_err(|e| map_io(path, e))?.len();
        let range = crate::features::clamp_range(range, length);

        file.seek(io::SeekFrom::Start(range.start))
            .await
            .map_err(|e| map_io(path, e))?;
        let mut buf = Vec::with_capacity(usize::try_from(range.end - range.start).unwrap_or(0));
        file.take(range.end - range.start)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| map_io(path, e))?;
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl ListService for LocalStorage {
    #[instrument(level = "debug", skip(self), fields(directory = %directory))]
    async fn list(&self, directory: &Path) -> Result<Vec<Path>> {
        let location = self.resolve(directory)?;
        let mut entries = fs::read_dir(&location)
            .await
            .map_err(|e| map_io(directory, e))?;

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_io(directory, e))? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!(entry = ?entry.file_name(), "Skipping non-UTF-8 name");
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let metadata = entry.metadata().await.map_err(|e| map_io(directory, e))?;
            let kind = if metadata.is_dir() && directory.is_root() {
                EntryType::Volume
            } else if metadata.is_dir() {
                EntryType::Directory
            } else {
                EntryType::File
            };
            children.push(
                directory
                    .child(&name, kind)
                    .with_attributes(attributes_of(&metadata)),
            );
        }
        children.sort();
        Ok(children)
    }
}

#[async_trait]
impl ManifestWriter for LocalStorage {
    #[instrument(level = "debug", skip(self, manifest), fields(target = %target, segments = manifest.entries.len()))]
    async fn commit_manifest(&self, target: &Path, manifest: &Manifest) -> Result<WriteReply> {
        let mut locations = Vec::with_capacity(manifest.entries.len());
        for entry in &manifest.entries {
            let segment = Path::file(&entry.path);
            let location = self.resolve(&segment)?;
            let file = fs::File::open(&location).await.map_err(|e| map_io(&segment, e))?;
            let mut reader = ChecksumReader::new(file);
            let handle = reader.handle();
            let size = tokio::io::copy(&mut reader, &mut tokio::io::sink())
                .await
                .map_err(|e| map_io(&segment, e))?;
            if size != entry.size_bytes {
                return Err(StorageError::conflict(
                    &segment,
                    format!("size {size} does not match manifest size {}", entry.size_bytes),
                ));
            }
            if handle.finalize().hash != entry.etag {
                return Err(StorageError::checksum(&segment, "etag does not match manifest"));
            }
            locations.push(location);
        }

        // segments are concatenated as they are read, one open file at a time
        let parts = stream::iter(locations)
            .then(|location| fs::File::open(location))
            .map_ok(ReaderStream::new)
            .try_flatten();
        let assembled: ByteStream = Box::pin(StreamReader::new(parts));
        let length = manifest.total_size();
        let checksum = self.write_atomic(target, assembled, length).await?;
        debug!(size = length, "Manifest committed");
        Ok(WriteReply {
            path: target.clone().with_kind(EntryType::File),
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::byte_stream;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_range() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let reply = storage
            .write(&Path::file("/c/a/b.bin"), byte_stream(&b"0123456789"[..]), 10)
            .await
            .unwrap();
        assert_eq!(reply.checksum, Checksum::sha256(b"0123456789"));
        assert!(dir.path().join("c/a/b.bin").is_file());

        let part = storage.read(&Path::file("/c/a/b.bin"), Some(3..6)).await.unwrap();
        assert_eq!(&part[..], b"345");
    }

    #[tokio::test]
    async fn test_parent_components_forbidden() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        let err = storage.find(&Path::file("/c/../../etc/passwd")).await.unwrap_err();
        assert!(matches!(err, StorageError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_delete_non_empty_directory() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage
            .write(&Path::file("/c/d/f"), byte_stream(&b"x"[..]), 1)
            .await
            .unwrap();
        let err = storage.delete(&[Path::directory("/c/d")]).await.unwrap_err();
        let StorageError::PartialDelete(failures) = err else {
            panic!("expected partial delete");
        };
        assert!(matches!(failures[0].error, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_list_skips_temporaries() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.mkdir(&Path::directory("/c/sub")).await.unwrap();
        storage
            .write(&Path::file("/c/file"), byte_stream(&b"abc"[..]), 3)
            .await
            .unwrap();
        std::fs::write(dir.path().join("c/.tmp.leftover"), b"x").unwrap();

        let listed = storage.list(&Path::directory("/c")).await.unwrap();
        assert_eq!(listed, vec![Path::file("/c/file"), Path::directory("/c/sub")]);
        assert_eq!(listed[0].attributes().size, Some(3));
    }
}
