//! Vault decorators for the capability traits.
//!
//! Every decorator wraps a backend and a [`CryptoVault`]. It translates the
//! cleartext path of a call to its ciphertext location, delegates to the
//! backend, and translates paths and attributes of the result back. Backend
//! errors are passed through, with `NotFound` renamed to the cleartext path.

macro_rules! crypto_feature {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name<S> {
            delegate: S,
            vault: std::sync::Arc<crate::vault::CryptoVault>,
        }

        impl<S: crate::features::Storage> $name<S> {
            pub fn new(delegate: S, vault: std::sync::Arc<crate::vault::CryptoVault>) -> Self {
                Self { delegate, vault }
            }

            pub fn vault(&self) -> &std::sync::Arc<crate::vault::CryptoVault> {
                &self.vault
            }

            fn storage(&self) -> &dyn crate::features::Storage {
                &self.delegate
            }
        }
    };
}

mod attributes;
mod delete;
mod directory;
mod find;
mod list;
mod read;
mod rename;
mod write;

use std::sync::Arc;

use crate::error::{DeleteFailure, Result, StorageError};
use crate::features::Storage;
use crate::path::Path;
use crate::vault::CryptoVault;

pub use attributes::CryptoAttributesFeature;
pub use delete::CryptoDeleteFeature;
pub use directory::CryptoDirectoryFeature;
pub use find::CryptoFindFeature;
pub use list::CryptoListService;
pub use read::CryptoReadFeature;
pub use rename::CryptoMoveFeature;
pub use write::CryptoWriteFeature;

/// Fails for operations that would remove or replace the vault root itself.
fn reject_home(vault: &CryptoVault, path: &Path, operation: &str) -> Result<()> {
    if vault.is_home(path) {
        return Err(StorageError::Unsupported(format!(
            "{operation} of the vault root {path}"
        )));
    }
    Ok(())
}

/// Delete ciphertext objects one by one, in order, skipping absent ones.
async fn delete_objects(storage: &dyn Storage, objects: &[Path]) -> Result<()> {
    for object in objects {
        match storage.delete(std::slice::from_ref(object)).await {
            Ok(()) => {}
            Err(StorageError::PartialDelete(mut failures)) if failures.len() == 1 => {
                let DeleteFailure { error, .. } = failures.remove(0);
                if !error.is_not_found() {
                    return Err(error);
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Every decorator over one backend and vault.
#[derive(Debug, Clone)]
pub struct CryptoFeatures<S> {
    pub directory: CryptoDirectoryFeature<S>,
    pub rename: CryptoMoveFeature<S>,
    pub delete: CryptoDeleteFeature<S>,
    pub find: CryptoFindFeature<S>,
    pub attributes: CryptoAttributesFeature<S>,
    pub write: CryptoWriteFeature<S>,
    pub read: CryptoReadFeature<S>,
    pub list: CryptoListService<S>,
}

impl<S: Storage + Clone> CryptoFeatures<S> {
    pub fn new(delegate: &S, vault: &Arc<CryptoVault>) -> Self {
        Self {
            directory: CryptoDirectoryFeature::new(delegate.clone(), Arc::clone(vault)),
            rename: CryptoMoveFeature::new(delegate.clone(), Arc::clone(vault)),
            delete: CryptoDeleteFeature::new(delegate.clone(), Arc::clone(vault)),
            find: CryptoFindFeature::new(delegate.clone(), Arc::clone(vault)),
            attributes: CryptoAttributesFeature::new(delegate.clone(), Arc::clone(vault)),
            write: CryptoWriteFeature::new(delegate.clone(), Arc::clone(vault)),
            read: CryptoReadFeature::new(delegate.clone(), Arc::clone(vault)),
            list: CryptoListService::new(delegate.clone(), Arc::clone(vault)),
        }
    }
}
