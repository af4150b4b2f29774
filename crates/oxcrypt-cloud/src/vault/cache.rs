//! Name encryption cache.
//!
//! AES-SIV is deterministic, so the ciphertext of `(dir_id, name)` never
//! changes for the lifetime of a master key. The cache is cleared when the
//! vault is locked.

use dashmap::DashMap;

/// Key: (directory_id, cleartext name)
type NameCacheKey = (String, String);

#[derive(Debug, Default)]
pub struct NameCache {
    /// Value: base64url ciphertext without suffix
    encrypted_names: DashMap<NameCacheKey, String>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, dir_id: &str, name: &str) -> Option<String> {
        let key = (dir_id.to_string(), name.to_string());
        self.encrypted_names.get(&key).map(|v| v.clone())
    }

    #[inline]
    pub fn insert(&self, dir_id: &str, name: &str, encrypted: String) {
        let key = (dir_id.to_string(), name.to_string());
        self.encrypted_names.insert(key, encrypted);
    }

    pub fn len(&self) -> usize {
        self.encrypted_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encrypted_names.is_empty()
    }

    pub fn clear(&self) {
        self.encrypted_names.clear();
    }
}
