use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{Result, StorageError};
use crate::features::{ByteStream, Storage, Write, WriteReply};
use crate::path::{EntryType, Path};
use crate::vault::content::{ChunkEncryptor, ciphertext_size};
use crate::vault::content_stream::encrypt_stream;
use crate::vault::crypto_vault::write_small;
use crate::vault::{CiphertextEntry, IdMode};

crypto_feature!(
    /// Encrypts the payload under a fresh content key and writes the
    /// ciphertext.
    CryptoWriteFeature
);

impl<S: Storage> CryptoWriteFeature<S> {
    /// Resolve the ciphertext location of `path`.
    ///
    /// Shortened entries get their folder and `name.c9s` here, so the
    /// returned content path is ready to receive the ciphertext.
    pub async fn prepare(&self, path: &Path) -> Result<CiphertextEntry> {
        let storage = self.storage();
        let file = path.clone().with_kind(EntryType::File);
        let entry = self.vault.resolve(storage, &file, IdMode::Read).await?;

        if !entry.is_long() && storage.find(&entry.node.clone().with_kind(EntryType::Directory)).await? {
            return Err(StorageError::conflict(path, "a directory exists at this path"));
        }
        if let Some(long_name) = &entry.long_name {
            match storage.mkdir(&entry.node).await {
                Ok(_) | Err(StorageError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
            write_small(storage, &entry.long_name_path(), long_name.clone().into_bytes()).await?;
        }
        Ok(entry)
    }

    /// A fresh content key for one file written to `path`.
    pub fn encryptor(&self, path: &Path) -> Result<Arc<ChunkEncryptor>> {
        let master_key = self.vault.master_key()?;
        let encryptor = ChunkEncryptor::new(&master_key).map_err(|e| StorageError::from_encryption(path, e))?;
        Ok(Arc::new(encryptor))
    }
}

#[async_trait]
impl<S: Storage> Write for CryptoWriteFeature<S> {
    #[instrument(level = "info", skip(self, stream), fields(path = %path))]
    async fn write(&self, path: &Path, stream: ByteStream, length: u64) -> Result<WriteReply> {
        let entry = self.prepare(path).await?;
        let (ciphertext, progress) = encrypt_stream(stream, length, self.encryptor(path)?);
        let ciphertext_length = ciphertext_size(length);

        let written = self
            .storage()
            .write(&entry.content_path(), ciphertext, ciphertext_length)
            .await;
        // a short cleartext surfaces as a short ciphertext below; report it in cleartext terms
        let consumed = progress.consumed();
        if consumed < length {
            return Err(StorageError::Transport(format!(
                "short write to {path}: expected {length} bytes, got {consumed}"
            )));
        }
        let reply = written?;
        debug!(ciphertext_length, long = entry.is_long(), "File written");

        Ok(WriteReply {
            path: path.clone().with_kind(EntryType::File),
            checksum: reply.checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStorage;
    use crate::error::ErrorCategory;
    use crate::features::byte_stream;
    use crate::checksum::Checksum;
    use crate::features::Read;
    use crate::features::Find;
    use crate::vault::{CryptoVault, VaultOptions};

    #[tokio::test]
    async fn test_ciphertext_stored() {
        let storage = MemoryStorage::new();
        let vault = Arc::new(CryptoVault::new(
            Path::directory("/v"),
            VaultOptions::default().scrypt_cost_log2(10),
        ));
        vault.create(&storage, "pw").await.unwrap();

        let write = CryptoWriteFeature::new(storage.clone(), Arc::clone(&vault));
        let reply = write
            .write(&Path::file("/v/secret.txt"), byte_stream(&b"plaintext"[..]), 9)
            .await
            .unwrap();
        assert_eq!(reply.path, Path::file("/v/secret.txt"));

        let entry = vault
            .resolve(&storage, &Path::file("/v/secret.txt"), IdMode::Read)
            .await
            .unwrap();
        let stored = storage.read(&entry.content_path(), None).await.unwrap();
        assert_eq!(stored.len() as u64, vault.ciphertext_length(9));
        assert_eq!(reply.checksum, Checksum::sha256(&stored));
        assert!(!stored.windows(9).any(|w| w == b"plaintext"));
    }

    #[tokio::test]
    async fn test_missing_parent_not_found() {
        let storage = MemoryStorage::new();
        let vault = Arc::new(CryptoVault::new(
            Path::directory("/v"),
            VaultOptions::default().scrypt_cost_log2(10),
        ));
        vault.create(&storage, "pw").await.unwrap();
        let write = CryptoWriteFeature::new(storage, vault);
        let err = write
            .write(&Path::file("/v/nope/f"), byte_stream(&b"x"[..]), 1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_short_stream_with_oversized_length() {
        let storage = MemoryStorage::new();
        let vault = Arc::new(CryptoVault::new(
            Path::directory("/v"),
            VaultOptions::default().scrypt_cost_log2(10),
        ));
        vault.create(&storage, "pw").await.unwrap();
        let write = CryptoWriteFeature::new(storage.clone(), Arc::clone(&vault));

        let err = write
            .write(&Path::file("/v/huge.bin"), byte_stream(&b"tiny"[..]), 1u64 << 60)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert!(err.to_string().contains("got 4"));

        let entry = vault
            .resolve(&storage, &Path::file("/v/huge.bin"), IdMode::Read)
            .await
            .unwrap();
        assert!(!storage.find(&entry.content_path()).await.unwrap());
    }
}
