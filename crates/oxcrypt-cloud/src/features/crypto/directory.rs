use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::error::{Result, StorageError};
use crate::features::{Directory, Storage};
use crate::path::{EntryType, Path};
use crate::vault::IdMode;
use crate::vault::crypto_vault::write_small;

crypto_feature!(
    /// Creates the `.c9r` folder, its `dir.c9r` marker and the data directory.
    CryptoDirectoryFeature
);

#[async_trait]
impl<S: Storage> Directory for CryptoDirectoryFeature<S> {
    #[instrument(level = "info", skip(self), fields(path = %path))]
    async fn mkdir(&self, path: &Path) -> Result<Path> {
        let storage = self.storage();
        if self.vault.is_home(path) {
            return Err(StorageError::already_exists(path));
        }
        let directory = path.clone().with_kind(EntryType::Directory);
        let entry = self
            .vault
            .resolve(storage, &directory, IdMode::Read)
            .await?;

        let marker = entry.marker_path();
        let node_exists = storage.find(&entry.node).await?;
        let marker_exists = node_exists && storage.find(&marker).await?;
        if marker_exists {
            return Err(StorageError::already_exists(path));
        }
        if !entry.is_long() && storage.find(&entry.node.clone().with_kind(EntryType::File)).await? {
            return Err(StorageError::already_exists(path));
        }

        if node_exists {
            warn!(node = %entry.node, "Repairing directory without marker");
        } else {
            match storage.mkdir(&entry.node).await {
                Ok(_) | Err(StorageError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if let Some(long_name) = &entry.long_name {
            write_small(storage, &entry.long_name_path(), long_name.clone().into_bytes()).await?;
        }

        let id = match self.vault.claim_directory_id(storage, &directory).await? {
            Some(id) => id,
            None if storage.find(&marker).await? => {
                // a concurrent mkdir wrote the marker first
                return Err(StorageError::already_exists(path));
            }
            None => {
                // cached id outlived its marker
                let id = self.vault.directory_id(storage, &directory, IdMode::Read).await?;
                write_small(storage, &marker, id.as_str().as_bytes().to_vec()).await?;
                id
            }
        };
        let data_dir = self.vault.create_data_directory(storage, &id).await?;

        info!(dir_id = %id, data_dir = %data_dir, "Directory created");
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::MemoryStorage;
    use crate::features::Find;
    use crate::vault::crypto_vault::DIR_ID_BACKUP_FILE;
    use crate::vault::{CryptoVault, VaultOptions};

    async fn feature() -> (MemoryStorage, CryptoDirectoryFeature<MemoryStorage>) {
        let storage = MemoryStorage::new();
        let vault = Arc::new(CryptoVault::new(
            Path::directory("/v"),
            VaultOptions::default().scrypt_cost_log2(10),
        ));
        vault.create(&storage, "pw").await.unwrap();
        (storage.clone(), CryptoDirectoryFeature::new(storage, vault))
    }

    #[tokio::test]
    async fn test_mkdir_writes_marker_and_data_directory() {
        let (storage, feature) = feature().await;
        let dir = Path::directory("/v/a");
        feature.mkdir(&dir).await.unwrap();

        let vault = feature.vault();
        let entry = vault.resolve(&storage, &dir, IdMode::Read).await.unwrap();
        assert!(storage.find(&entry.marker_path()).await.unwrap());

        let id = vault.directory_id(&storage, &dir, IdMode::Read).await.unwrap();
        let data_dir = vault.data_directory(&id).unwrap();
        assert!(
            storage
                .find(&data_dir.child(DIR_ID_BACKUP_FILE, EntryType::File))
                .await
                .unwrap()
        );
        assert_eq!(vault.read_dir_id_backup(&storage, &data_dir).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_mkdir_existing_fails() {
        let (_storage, feature) = feature().await;
        let dir = Path::directory("/v/a");
        feature.mkdir(&dir).await.unwrap();
        assert!(matches!(
            feature.mkdir(&dir).await,
            Err(StorageError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_mkdir_missing_parent() {
        let (_storage, feature) = feature().await;
        let err = feature.mkdir(&Path::directory("/v/a/b")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mkdir_repairs_orphan() {
        let (storage, feature) = feature().await;
        let dir = Path::directory("/v/orphan");
        let entry = feature
            .vault()
            .resolve(&storage, &dir, IdMode::Read)
            .await
            .unwrap();
        storage.mkdir(&entry.node).await.unwrap();

        feature.mkdir(&dir).await.unwrap();
        assert!(storage.find(&entry.marker_path()).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mkdir_one_winner() {
        let (_storage, feature) = feature().await;
        let feature = Arc::new(feature);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let feature = Arc::clone(&feature);
                tokio::spawn(async move { feature.mkdir(&Path::directory("/v/shared")).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(StorageError::AlreadyExists { .. }) => {}
                Err(e) => panic!("unexpected mkdir failure: {e}"),
            }
        }
        assert_eq!(created, 1);
    }
}
