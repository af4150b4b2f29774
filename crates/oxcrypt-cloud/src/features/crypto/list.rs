use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::features::{ListService, Storage};
use crate::path::{EntryType, Path};
use crate::vault::IdMode;

crypto_feature!(
    /// Lists the data directory of a cleartext directory and decrypts names.
    CryptoListService
);

#[async_trait]
impl<S: Storage> ListService for CryptoListService<S> {
    #[instrument(level = "debug", skip(self), fields(directory = %directory))]
    async fn list(&self, directory: &Path) -> Result<Vec<Path>> {
        let storage = self.storage();
        let id = self
            .vault
            .directory_id(storage, directory, IdMode::Read)
            .await?;
        let data_dir = self.vault.data_directory(&id)?;
        let children = storage
            .list(&data_dir)
            .await
            .map_err(|e| e.cleartext_not_found(directory))?;

        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            let Some(decoded) = self.vault.decrypt_entry(storage, &id, &child).await? else {
                continue;
            };
            let ciphertext_attributes = if decoded.entry.kind == EntryType::File && decoded.entry.is_long() {
                storage.attributes(&decoded.entry.content_path()).await?
            } else {
                child.attributes().clone()
            };
            let attributes = self
                .vault
                .cleartext_attributes(decoded.entry.kind, &ciphertext_attributes);
            entries.push(
                directory
                    .child(&decoded.name, decoded.entry.kind)
                    .with_attributes(attributes),
            );
        }

        entries.sort();
        debug!(count = entries.len(), "Directory listed");
        Ok(entries)
    }
}
