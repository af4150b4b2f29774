use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::delete::delete_entry;
use super::{delete_objects, reject_home};
use crate::error::{Result, StorageError};
use crate::features::{Move, Storage};
use crate::path::{EntryType, Path};
use crate::vault::crypto_vault::{DIR_MARKER_FILE, LONG_CONTENTS_FILE, write_small};
use crate::vault::{CiphertextEntry, IdMode};

crypto_feature!(
    /// Renames by re-encrypting the last name component only.
    ///
    /// A moved directory keeps its identifier, so nothing below it changes.
    CryptoMoveFeature
);

impl<S: Storage> CryptoMoveFeature<S> {
    async fn exists(&self, entry: &CiphertextEntry) -> Result<bool> {
        let storage = self.storage();
        if storage.find(&entry.node).await? {
            return Ok(true);
        }
        // a short entry of the other type under the same name
        if entry.is_long() {
            return Ok(false);
        }
        let other = if entry.is_directory() {
            EntryType::File
        } else {
            EntryType::Directory
        };
        storage.find(&entry.node.clone().with_kind(other)).await
    }

    async fn move_entry(&self, from: &CiphertextEntry, to: &CiphertextEntry, overwrite: bool) -> Result<()> {
        let storage = self.storage();
        match (from.is_long(), to.is_long()) {
            (false, false) => {
                storage.move_to(&from.node, &to.node, overwrite).await?;
            }
            (true, true) => {
                storage.move_to(&from.node, &to.node, overwrite).await?;
                if let Some(long_name) = &to.long_name {
                    write_small(storage, &to.long_name_path(), long_name.clone().into_bytes()).await?;
                }
            }
            (false, true) => {
                debug!("Moving short entry into long-name folder");
                match storage.mkdir(&to.node).await {
                    Ok(_) | Err(StorageError::AlreadyExists { .. }) => {}
                    Err(e) => return Err(e),
                }
                if let Some(long_name) = &to.long_name {
                    write_small(storage, &to.long_name_path(), long_name.clone().into_bytes()).await?;
                }
                if from.is_directory() {
                    storage
                        .move_to(&from.marker_path(), &to.marker_path(), true)
                        .await?;
                    delete_objects(storage, std::slice::from_ref(&from.node)).await?;
                } else {
                    let contents = to.node.child(LONG_CONTENTS_FILE, EntryType::File);
                    storage.move_to(&from.node, &contents, true).await?;
                }
            }
            (true, false) => {
                debug!("Moving long-name entry to short name");
                if from.is_directory() {
                    match storage.mkdir(&to.node).await {
                        Ok(_) | Err(StorageError::AlreadyExists { .. }) => {}
                        Err(e) => return Err(e),
                    }
                    let marker = to.node.child(DIR_MARKER_FILE, EntryType::File);
                    storage.move_to(&from.marker_path(), &marker, true).await?;
                } else {
                    storage
                        .move_to(&from.content_path(), &to.node, overwrite)
                        .await?;
                }
                delete_objects(storage, &[from.long_name_path(), from.node.clone()]).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Storage> Move for CryptoMoveFeature<S> {
    #[instrument(level = "info", skip(self), fields(source = %source, target = %target))]
    async fn move_to(&self, source: &Path, target: &Path, overwrite: bool) -> Result<Path> {
        reject_home(&self.vault, source, "move")?;
        reject_home(&self.vault, target, "replacement")?;
        if !self.vault.contains(target) {
            return Err(StorageError::Unsupported(format!(
                "move of {source} out of the vault at {}",
                self.vault.home()
            )));
        }
        if target.starts_with(source) {
            return Err(StorageError::conflict(target, "cannot move into itself"));
        }
        let storage = self.storage();
        let kind = source.kind();
        let target = target.clone().with_kind(kind);

        let from = self
            .vault
            .resolve(storage, source, IdMode::Read)
            .await?;
        if !storage.find(&from.node).await? {
            return Err(StorageError::not_found(source));
        }
        let to = self
            .vault
            .resolve(storage, &target, IdMode::Read)
            .await?;

        if self.exists(&to).await? {
            if !overwrite {
                return Err(StorageError::conflict(&target, "target exists"));
            }
            let existing = if storage.find(&to.node).await? || to.is_long() {
                to.clone()
            } else {
                let other = if to.is_directory() {
                    EntryType::File
                } else {
                    EntryType::Directory
                };
                CiphertextEntry {
                    node: to.node.clone().with_kind(other),
                    kind: other,
                    ..to.clone()
                }
            };
            let existing_path = target.clone().with_kind(existing.kind);
            delete_entry(&self.vault, storage, &existing_path, &existing).await?;
        }

        self.move_entry(&from, &to, overwrite).await?;

        if from.is_directory() {
            self.vault.rename_directory(source, &target);
        }
        info!(long = to.is_long(), "Entry moved");
        Ok(target)
    }
}
