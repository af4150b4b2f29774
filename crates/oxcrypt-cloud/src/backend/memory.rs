//! In-memory backend.
//!
//! Objects and directories live in one ordered map keyed by their relative
//! path, so a subtree is a contiguous key range and moves are atomic under
//! the map's write lock. Directories are implicit in the object-store sense:
//! writing `a/b/c` creates `a` and `a/b`.
//!
//! Faults can be injected per path pattern to exercise failure handling.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, trace};

use crate::checksum::Checksum;
use crate::error::{DeleteFailure, Result, StorageError};
use crate::features::{
    AttributesFinder, ByteStream, Delete, Directory, Find, ListService, ManifestWriter, Move, Read,
    Write, WriteReply, clamp_range,
};
use crate::path::{EntryType, Path, PathAttributes};
use crate::upload::Manifest;

/// Upper bound on the buffer reserved up front for a write; larger payloads grow as they arrive.
const PREALLOCATE_LIMIT: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
enum Node {
    Directory {
        modified: SystemTime,
    },
    File {
        data: Bytes,
        checksum: Checksum,
        modified: SystemTime,
    },
}

impl Node {
    fn is_directory(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    fn attributes(&self) -> PathAttributes {
        match self {
            Node::Directory { modified } => PathAttributes::default().with_modified(*modified),
            Node::File {
                data,
                checksum,
                modified,
            } => PathAttributes::default()
                .with_size(data.len() as u64)
                .with_checksum(checksum.clone())
                .with_modified(*modified),
        }
    }
}

/// Failure injected into writes whose path contains a pattern.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Store the data but report a checksum of different bytes
    WrongChecksum,
    /// Fail the write with a transport error
    Unavailable,
    /// Sleep before storing
    Delay(Duration),
}

#[derive(Debug, Default)]
struct Inner {
    nodes: RwLock<BTreeMap<String, Node>>,
    faults: Mutex<Vec<(String, Fault)>>,
    writes: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

fn child_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

fn is_direct_child(prefix: &str, key: &str) -> bool {
    key.len() > prefix.len() && key.starts_with(prefix) && !key[prefix.len()..].contains('/')
}

fn kind_matches(path: &Path, node: &Node) -> bool {
    path.is_directory() == node.is_directory()
}

fn entry_path(key: &str, node: &Node) -> Path {
    let kind = if node.is_directory() {
        if key.contains('/') {
            EntryType::Directory
        } else {
            EntryType::Volume
        }
    } else {
        EntryType::File
    };
    Path::new(key, kind).with_attributes(node.attributes())
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        debug!("creating new in-memory storage");
        Self::default()
    }

    /// Inject `fault` into every later write whose path contains `pattern`.
    pub fn inject_fault(&self, pattern: impl Into<String>, fault: Fault) {
        self.inner.faults.lock().push((pattern.into(), fault));
    }

    pub fn clear_faults(&self) {
        self.inner.faults.lock().clear();
    }

    /// Number of completed writes, manifests included.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner
            .nodes
            .read()
            .contains_key(Path::file(path).as_str())
    }

    /// All keys, directories included, in order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.nodes.read().keys().cloned().collect()
    }

    pub fn object_count(&self) -> usize {
        self.inner
            .nodes
            .read()
            .values()
            .filter(|n| !n.is_directory())
            .count()
    }

    /// Raw object bytes.
    pub fn get(&self, path: &str) -> Option<Bytes> {
        match self.inner.nodes.read().get(Path::file(path).as_str()) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Replace raw object bytes without going through a capability.
    pub fn put(&self, path: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let key = Path::file(path).as_str().to_string();
        let mut nodes = self.inner.nodes.write();
        Self::create_parents(&mut nodes, &key);
        nodes.insert(
            key,
            Node::File {
                checksum: Checksum::sha256(&data),
                data,
                modified: SystemTime::now(),
            },
        );
    }

    fn faults_for(&self, key: &str) -> Vec<Fault> {
        self.inner
            .faults
            .lock()
            .iter()
            .filter(|(pattern, _)| key.contains(pattern.as_str()))
            .map(|(_, fault)| fault.clone())
            .collect()
    }

    fn create_parents(nodes: &mut BTreeMap<String, Node>, key: &str) {
        let mut end = 0;
        while let Some(pos) = key[end..].find('/') {
            end += pos;
            nodes
                .entry(key[..end].to_string())
                .or_insert(Node::Directory {
                    modified: SystemTime::now(),
                });
            end += 1;
        }
    }

    fn parent_is_file(nodes: &BTreeMap<String, Node>, key: &str) -> Option<String> {
        let mut end = 0;
        while let Some(pos) = key[end..].find('/') {
            end += pos;
            if let Some(Node::File { .. }) = nodes.get(&key[..end]) {
                return Some(key[..end].to_string());
            }
            end += 1;
        }
        None
    }

    fn store(&self, path: &Path, data: Bytes) -> Result<Checksum> {
        let key = path.as_str().to_string();
        let checksum = Checksum::sha256(&data);
        let mut nodes = self.inner.nodes.write();
        if let Some(parent) = Self::parent_is_file(&nodes, &key) {
            return Err(StorageError::conflict(path, format!("parent {parent} is a file")));
        }
        if nodes.get(&key).is_some_and(Node::is_directory) {
            return Err(StorageError::conflict(path, "a directory exists at this path"));
        }
        Self::create_parents(&mut nodes, &key);
        nodes.insert(
            key,
            Node::File {
                data,
                checksum: checksum.clone(),
                modified: SystemTime::now(),
            },
        );
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        Ok(checksum)
    }
}

#[async_trait]
impl Directory for MemoryStorage {
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    async fn mkdir(&self, path: &Path) -> Result<Path> {
        if path.is_root() {
            return Ok(Path::root());
        }
        let key = path.as_str().to_string();
        let mut nodes = self.inner.nodes.write();
        if nodes.contains_key(&key) {
            return Err(StorageError::already_exists(path));
        }
        if let Some(parent) = Self::parent_is_file(&nodes, &key) {
            return Err(StorageError::conflict(path, format!("parent {parent} is a file")));
        }
        Self::create_parents(&mut nodes, &key);
        let node = Node::Directory {
            modified: SystemTime::now(),
        };
        let created = entry_path(&key, &node);
        nodes.insert(key, node);
        Ok(created)
    }
}

#[async_trait]
impl Move for MemoryStorage {
    #[instrument(level = "debug", skip(self), fields(source = %source, target = %target))]
    async fn move_to(&self, source: &Path, target: &Path, overwrite: bool) -> Result<Path> {
        let from = source.as_str().to_string();
        let to = target.as_str().to_string();
        if from.is_empty() || to.is_empty() || to == from || to.starts_with(&child_prefix(&from)) {
            return Err(StorageError::conflict(target, "cannot move onto itself or into itself"));
        }

        let mut nodes = self.inner.nodes.write();
        match nodes.get(&from) {
            Some(node) if kind_matches(source, node) => {}
            _ => return Err(StorageError::not_found(source)),
        }
        if let Some(parent) = Self::parent_is_file(&nodes, &to) {
            return Err(StorageError::conflict(target, format!("parent {parent} is a file")));
        }
        if nodes.contains_key(&to) {
            if !overwrite {
                return Err(StorageError::conflict(target, "target exists"));
            }
            let prefix = child_prefix(&to);
            nodes.retain(|key, _| key != &to && !key.starts_with(&prefix));
        }

        let prefix = child_prefix(&from);
        let moved: Vec<String> = nodes
            .range(from.clone()..)
            .take_while(|(key, _)| **key == from || key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();

        Self::create_parents(&mut nodes, &to);
        for key in moved {
            if let Some(node) = nodes.remove(&key) {
                let rekeyed = format!("{to}{}", &key[from.len()..]);
                trace!(from = %key, to = %rekeyed, "re-keying");
                nodes.insert(rekeyed, node);
            }
        }

        let node = nodes.get(&to).ok_or_else(|| StorageError::not_found(target))?;
        Ok(entry_path(&to, node))
    }
}

#[async_trait]
impl Delete for MemoryStorage {
    #[instrument(level = "debug", skip(self, paths), fields(count = paths.len()))]
    async fn delete(&self, paths: &[Path]) -> Result<()> {
        let mut failures = Vec::new();
        let mut nodes = self.inner.nodes.write();
        for path in paths {
            let key = path.as_str().to_string();
            let error = match nodes.get(&key) {
                None => Some(StorageError::not_found(path)),
                Some(node) if node.is_directory() => {
                    let prefix = child_prefix(&key);
                    let has_children = nodes
                        .range(prefix.clone()..)
                        .next()
                        .is_some_and(|(k, _)| k.starts_with(&prefix));
                    has_children.then(|| StorageError::conflict(path, "directory not empty"))
                }
                Some(_) => None,
            };
            match error {
                Some(error) => failures.push(DeleteFailure {
                    path: path.absolute(),
                    error,
                }),
                None => {
                    nodes.remove(&key);
                }
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
impl Find for MemoryStorage {
    async fn find(&self, path: &Path) -> Result<bool> {
        if path.is_root() {
            return Ok(path.is_directory());
        }
        Ok(self
            .inner
            .nodes
            .read()
            .get(path.as_str())
            .is_some_and(|node| kind_matches(path, node)))
    }
}

#[async_trait]
impl AttributesFinder for MemoryStorage {
    async fn attributes(&self, path: &Path) -> Result<PathAttributes> {
        if path.is_root() {
            return Ok(PathAttributes::default());
        }
        match self.inner.nodes.read().get(path.as_str()) {
            Some(node) if kind_matches(path, node) => Ok(node.attributes()),
            _ => Err(StorageError::not_found(path)),
        }
    }
}

#[async_trait]
impl Write for MemoryStorage {
    #[instrument(level = "debug", skip(self, stream), fields(path = %path))]
    async fn write(&self, path: &Path, mut stream: ByteStream, length: u64) -> Result<WriteReply> {
        let faults = self.faults_for(path.as_str());
        for fault in &faults {
            match fault {
                Fault::Delay(delay) => tokio::time::sleep(*delay).await,
                Fault::Unavailable => {
                    return Err(StorageError::Transport(format!(
                        "service unavailable for {path}"
                    )));
                }
                Fault::WrongChecksum => {}
            }
        }

        let mut buf = BytesMut::with_capacity(usize::try_from(length.min(PREALLOCATE_LIMIT)).unwrap_or(0));
        let mut limited = (&mut stream).take(length);
        while limited
            .read_buf(&mut buf)
            .await
            .map_err(|e| StorageError::io(path, e))?
            > 0
        {}
        if buf.len() as u64 != length {
            return Err(StorageError::Transport(format!(
                "short write to {path}: expected {length} bytes, got {}",
                buf.len()
            )));
        }

        let mut checksum = self.store(path, buf.freeze())?;
        if faults.iter().any(|f| matches!(f, Fault::WrongChecksum)) {
            checksum = Checksum::sha256(b"corrupted in transit");
        }
        Ok(WriteReply {
            path: path.clone().with_kind(EntryType::File),
            checksum,
        })
    }
}

#[async_trait]
impl Read for MemoryStorage {
    async fn read(&self, path: &Path, range: Option<Range<u64>>) -> Result<Bytes> {
        match self.inner.nodes.read().get(path.as_str()) {
            Some(Node::File { data, .. }) => {
                let r = clamp_range(range, data.len() as u64);
                // clamped to data.len(), which fits in usize
                #[allow(clippy::cast_possible_truncation)]
                Ok(data.slice(r.start as usize..r.end as usize))
            }
            _ => Err(StorageError::not_found(path)),
        }
    }
}

#[async_trait]
impl ListService for MemoryStorage {
    #[instrument(level = "debug", skip(self), fields(directory = %directory))]
    async fn list(&self, directory: &Path) -> Result<Vec<Path>> {
        let key = directory.as_str();
        let nodes = self.inner.nodes.read();
        if !key.is_empty() && !nodes.get(key).is_some_and(Node::is_directory) {
            return Err(StorageError::not_found(directory));
        }
        let prefix = child_prefix(key);
        let children: Vec<Path> = nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| is_direct_child(&prefix, k))
            .map(|(k, node)| entry_path(k, node))
            .collect();
        trace!(count = children.len(), "listed");
        Ok(children)
    }
}

#[async_trait]
impl ManifestWriter for MemoryStorage {
    #[instrument(level = "debug", skip(self, manifest), fields(target = %target, segments = manifest.entries.len()))]
    async fn commit_manifest(&self, target: &Path, manifest: &Manifest) -> Result<WriteReply> {
        let mut assembled = BytesMut::new();
        {
            let nodes = self.inner.nodes.read();
            for entry in &manifest.entries {
                let segment = Path::file(&entry.path);
                let Some(Node::File { data, checksum, .. }) = nodes.get(segment.as_str()) else {
                    return Err(StorageError::not_found(&segment));
                };
                if data.len() as u64 != entry.size_bytes {
                    return Err(StorageError::conflict(
                        &segment,
                        format!("size {} does not match manifest size {}", data.len(), entry.size_bytes),
                    ));
                }
                if checksum.hash != entry.etag {
                    return Err(StorageError::checksum(&segment, "etag does not match manifest"));
                }
                assembled.extend_from_slice(data);
            }
        }

        let checksum = self.store(target, assembled.freeze())?;
        debug!(size = manifest.total_size(), "manifest committed");
        Ok(WriteReply {
            path: target.clone().with_kind(EntryType::File),
            checksum,
        })
    }
}
