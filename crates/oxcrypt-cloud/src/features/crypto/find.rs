use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::error::Result;
use crate::features::{Find, Storage};
use crate::path::Path;
use crate::vault::IdMode;

crypto_feature!(
    /// Existence check. Unresolvable ancestors mean "absent", never an error.
    CryptoFindFeature
);

#[async_trait]
impl<S: Storage> Find for CryptoFindFeature<S> {
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    async fn find(&self, path: &Path) -> Result<bool> {
        let storage = self.storage();
        if self.vault.is_home(path) {
            return storage.find(self.vault.home()).await;
        }

        let entry = match self.vault.resolve(storage, path, IdMode::Read).await {
            Ok(entry) => entry,
            Err(e) if e.is_not_found() => {
                trace!("Ancestor not found");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        // a directory is only valid with its marker
        let object = if entry.is_directory() {
            entry.marker_path()
        } else {
            entry.content_path()
        };
        storage.find(&object).await
    }
}
