use async_trait::async_trait;
use tracing::instrument;

use crate::error::Result;
use crate::features::{AttributesFinder, Storage};
use crate::path::{EntryType, Path, PathAttributes};
use crate::vault::IdMode;

crypto_feature!(
    /// Attributes of the ciphertext object, with sizes in cleartext bytes.
    CryptoAttributesFeature
);

#[async_trait]
impl<S: Storage> AttributesFinder for CryptoAttributesFeature<S> {
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    async fn attributes(&self, path: &Path) -> Result<PathAttributes> {
        let storage = self.storage();
        if self.vault.is_home(path) {
            let attributes = storage.attributes(self.vault.home()).await?;
            return Ok(self
                .vault
                .cleartext_attributes(EntryType::Directory, &attributes));
        }

        let entry = self.vault.resolve(storage, path, IdMode::Read).await?;
        let object = if entry.is_directory() {
            entry.node.clone()
        } else {
            entry.content_path()
        };
        let attributes = storage
            .attributes(&object)
            .await
            .map_err(|e| e.cleartext_not_found(path))?;
        Ok(self.vault.cleartext_attributes(entry.kind, &attributes))
    }
}
