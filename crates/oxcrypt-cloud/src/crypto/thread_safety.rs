//! `Send` and `Sync` for [`MasterKey`].
//!
//! `MemSafe` holds a raw pointer to its mlocked page, which suppresses the
//! automatic auto-trait impls. Every access to that page goes through the
//! `RwLock` wrapping each key half, and the protection syscalls themselves
//! are thread-safe, so sharing the key across tokio worker threads is sound.

use super::keys::MasterKey;

// SAFETY: both MemSafe halves sit behind an RwLock; the pointed-to page is
// valid from any thread and is only dereferenced while the lock is held.
unsafe impl Send for MasterKey {}

// SAFETY: shared access only reaches the key bytes through RwLock::write(),
// so concurrent callers are serialized.
unsafe impl Sync for MasterKey {}
