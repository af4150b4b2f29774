use std::cmp::Reverse;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{delete_objects, reject_home};
use crate::error::{DeleteFailure, Result, StorageError};
use crate::features::{Delete, Storage};
use crate::path::{EntryType, Path};
use crate::vault::crypto_vault::DIR_ID_BACKUP_FILE;
use crate::vault::{CiphertextEntry, CryptoVault, IdMode};

crypto_feature!(
    /// Deletes entries deepest first and collects per-path failures.
    CryptoDeleteFeature
);

/// Remove the ciphertext objects of one cleartext entry.
///
/// Directories must be empty. Their data directory and identifier backup
/// go first, then the marker, the long name and the entry folder.
pub(super) async fn delete_entry(
    vault: &CryptoVault,
    storage: &dyn Storage,
    path: &Path,
    entry: &CiphertextEntry,
) -> Result<()> {
    if !entry.is_directory() {
        if !storage.find(&entry.content_path()).await? {
            return Err(StorageError::not_found(path));
        }
        let mut objects = vec![entry.content_path()];
        if entry.is_long() {
            objects.push(entry.long_name_path());
            objects.push(entry.node.clone());
        }
        return delete_objects(storage, &objects).await;
    }

    match vault.directory_id(storage, path, IdMode::Read).await {
        Ok(id) => {
            let data_dir = vault.data_directory(&id)?;
            let children = match storage.list(&data_dir).await {
                Ok(children) => children,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e),
            };
            if children.iter().any(|c| c.name() != DIR_ID_BACKUP_FILE) {
                return Err(StorageError::conflict(path, "directory not empty"));
            }
            delete_objects(
                storage,
                &[data_dir.child(DIR_ID_BACKUP_FILE, EntryType::File), data_dir],
            )
            .await?;
        }
        Err(e) if e.is_not_found() => {
            if !storage.find(&entry.node).await? {
                return Err(StorageError::not_found(path));
            }
            warn!(node = %entry.node, "Deleting directory without marker");
        }
        Err(e) => return Err(e),
    }

    let mut objects = vec![entry.marker_path()];
    if entry.is_long() {
        objects.push(entry.long_name_path());
    }
    objects.push(entry.node.clone());
    delete_objects(storage, &objects).await?;
    vault.forget_directory(path);
    Ok(())
}

impl<S: Storage> CryptoDeleteFeature<S> {
    async fn delete_one(&self, path: &Path) -> Result<()> {
        reject_home(&self.vault, path, "deletion")?;
        let storage = self.storage();
        let entry = self.vault.resolve(storage, path, IdMode::Read).await?;
        delete_entry(&self.vault, storage, path, &entry).await
    }
}

#[async_trait]
impl<S: Storage> Delete for CryptoDeleteFeature<S> {
    #[instrument(level = "info", skip(self, paths), fields(count = paths.len()))]
    async fn delete(&self, paths: &[Path]) -> Result<()> {
        let mut ordered: Vec<&Path> = paths.iter().collect();
        ordered.sort_by_key(|p| Reverse(p.depth()));

        let mut failures = Vec::new();
        for path in ordered {
            match self.delete_one(path).await {
                Ok(()) => debug!(path = %path, "Deleted"),
                Err(error) => failures.push(DeleteFailure {
                    path: path.absolute(),
                    error,
                }),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::PartialDelete(failures))
        }
    }
}
