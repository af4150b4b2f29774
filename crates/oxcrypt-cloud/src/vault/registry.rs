//! Which vault, if any, governs a path.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::crypto_vault::CryptoVault;
use crate::error::{Result, VaultError};
use crate::path::Path;

/// Vaults attached to one session.
///
/// Read-mostly: lookups take a shared lock, and only attaching or detaching
/// a vault takes the exclusive one.
#[derive(Debug, Default)]
pub struct VaultRegistry {
    vaults: RwLock<Vec<Arc<CryptoVault>>>,
}

impl VaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `vault`. A second vault at the same home is rejected.
    pub fn add(&self, vault: Arc<CryptoVault>) -> Result<()> {
        let mut vaults = self.vaults.write();
        if vaults.iter().any(|v| v.home() == vault.home()) {
            return Err(VaultError::AlreadyRegistered {
                home: vault.home().absolute(),
            }
            .into());
        }
        info!(home = %vault.home(), "Vault registered");
        vaults.push(vault);
        Ok(())
    }

    /// Detach and return the vault rooted exactly at `home`.
    pub fn remove(&self, home: &Path) -> Option<Arc<CryptoVault>> {
        let mut vaults = self.vaults.write();
        let index = vaults
            .iter()
            .position(|v| v.home().as_str() == home.as_str())?;
        debug!(home = %home, "Vault removed");
        Some(vaults.remove(index))
    }

    /// The vault whose home is the longest ancestor-or-self of `path`.
    pub fn find(&self, path: &Path) -> Option<Arc<CryptoVault>> {
        self.vaults
            .read()
            .iter()
            .filter(|v| v.contains(path))
            .max_by_key(|v| v.home().depth())
            .cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    /// Lock and detach every vault.
    pub fn close(&self) {
        let vaults = std::mem::take(&mut *self.vaults.write());
        for vault in vaults {
            vault.lock();
        }
    }

    pub fn len(&self) -> usize {
        self.vaults.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::vault::{VaultOptions, VaultStatus};

    fn vault(home: &str) -> Arc<CryptoVault> {
        Arc::new(CryptoVault::new(Path::directory(home), VaultOptions::default()))
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = VaultRegistry::new();
        registry.add(vault("/c/outer")).unwrap();
        registry.add(vault("/c/outer/inner")).unwrap();

        let found = registry.find(&Path::file("/c/outer/inner/f")).unwrap();
        assert_eq!(found.home().as_str(), "c/outer/inner");
        let found = registry.find(&Path::file("/c/outer/f")).unwrap();
        assert_eq!(found.home().as_str(), "c/outer");
        assert!(registry.find(&Path::file("/c/outside")).is_none());
        assert!(registry.find(&Path::file("/c/outerx/f")).is_none());
    }

    #[test]
    fn test_duplicate_home_rejected() {
        let registry = VaultRegistry::new();
        registry.add(vault("/v")).unwrap();
        let err = registry.add(vault("/v")).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Vault(VaultError::AlreadyRegistered { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_and_close() {
        let registry = VaultRegistry::new();
        let kept = vault("/a");
        registry.add(Arc::clone(&kept)).unwrap();
        registry.add(vault("/b")).unwrap();

        assert!(registry.remove(&Path::directory("/b")).is_some());
        assert!(registry.remove(&Path::directory("/b")).is_none());

        registry.close();
        assert!(registry.is_empty());
        assert_eq!(kept.status(), VaultStatus::Locked);
    }
}
