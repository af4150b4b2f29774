//! Directory identifier cache with single-flight resolution.
//!
//! Every cleartext directory of a vault has an opaque identifier stored in
//! its `dir.c9r` marker. Resolving it may read the marker or, for writers,
//! generate and persist a new one. Concurrent resolutions of one directory
//! share a single [`OnceCell`]: the first caller runs the initializer and the
//! others wait for its result. A failed initializer leaves no entry behind,
//! so the next caller retries and unknown paths do not accumulate.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::trace;
use uuid::Uuid;

/// Opaque identifier of a vault directory. The vault root has the empty id.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DirId(String);

impl DirId {
    pub fn root() -> Self {
        DirId(String::new())
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        DirId(raw.into())
    }

    /// Fresh UUID v4 identifier for a new directory.
    pub fn random() -> Self {
        DirId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirId({self})")
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Default)]
pub struct DirIdStats {
    /// Resolutions that ran the initializer
    pub initialized: AtomicU64,
    /// Resolutions served from an already initialized cell
    pub hits: AtomicU64,
}

impl DirIdStats {
    pub fn initialized(&self) -> u64 {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Cleartext directory key to identifier, keyed by the path relative to the
/// vault root (`""` for the root itself).
#[derive(Debug, Default)]
pub struct DirectoryIdProvider {
    cells: DashMap<String, Arc<OnceCell<DirId>>>,
    stats: DirIdStats,
}

fn is_self_or_descendant(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key == prefix
        || (key.len() > prefix.len() && key.starts_with(prefix) && key.as_bytes()[prefix.len()] == b'/')
}

impl DirectoryIdProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier of `key`, running `init` only if no other caller has
    /// resolved it yet.
    pub async fn resolve<F, Fut, E>(&self, key: &str, init: F) -> Result<DirId, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DirId, E>>,
    {
        let cell = self
            .cells
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(id) = cell.get() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(id.clone());
        }

        let resolved = cell
            .get_or_try_init(|| async {
                self.stats.initialized.fetch_add(1, Ordering::Relaxed);
                let id = init().await?;
                trace!(key, dir_id = %id, "directory id resolved");
                Ok(id)
            })
            .await;
        match resolved {
            Ok(id) => Ok(id.clone()),
            Err(e) => {
                // drop the empty cell unless another caller still holds it
                self.cells.remove_if(key, |_, c| {
                    Arc::ptr_eq(c, &cell) && c.get().is_none() && Arc::strong_count(c) == 2
                });
                Err(e)
            }
        }
    }

    /// Cached identifier, if resolved.
    pub fn get(&self, key: &str) -> Option<DirId> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Record a known identifier, replacing any cached one.
    pub fn insert(&self, key: &str, id: DirId) {
        self.cells
            .insert(key.to_string(), Arc::new(OnceCell::new_with(Some(id))));
    }

    /// Forget `key` and everything below it.
    pub fn remove(&self, key: &str) {
        self.cells.retain(|k, _| !is_self_or_descendant(k, key));
    }

    /// Re-key `from` and its descendants to live under `to`.
    pub fn rename(&self, from: &str, to: &str) {
        let moved: Vec<(String, Arc<OnceCell<DirId>>)> = self
            .cells
            .iter()
            .filter(|entry| is_self_or_descendant(entry.key(), from))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        self.remove(to);
        for (key, cell) in moved {
            self.cells.remove(&key);
            let rekeyed = if from.is_empty() {
                format!("{to}/{key}")
            } else {
                format!("{to}{}", &key[from.len()..])
            };
            self.cells.insert(rekeyed, cell);
        }
    }

    pub fn clear(&self) {
        self.cells.clear();
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn stats(&self) -> &DirIdStats {
        &self.stats
    }
}
