use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{instrument, trace};

use crate::error::{Result, StorageError};
use crate::features::{Read, Storage};
use crate::path::{EntryType, Path};
use crate::vault::IdMode;
use crate::vault::content::{
    CHUNK_PLAINTEXT_SIZE, FileContext, FileHeader, HEADER_SIZE, cleartext_size, covering_chunks,
    decrypt_chunks, decrypt_content,
};

crypto_feature!(
    /// Authenticated reads. Ranges fetch only the header and covering chunks.
    CryptoReadFeature
);

#[async_trait]
impl<S: Storage> Read for CryptoReadFeature<S> {
    #[instrument(level = "debug", skip(self), fields(path = %path, range = ?range))]
    async fn read(&self, path: &Path, range: Option<Range<u64>>) -> Result<Bytes> {
        let storage = self.storage();
        let file = path.clone().with_kind(EntryType::File);
        let entry = self.vault.resolve(storage, &file, IdMode::Read).await?;
        let content = entry.content_path();
        let master_key = self.vault.master_key()?;
        let context = FileContext::new()
            .with_filename(path.name())
            .with_path(content.absolute());

        let Some(range) = range else {
            let ciphertext = storage
                .read(&content, None)
                .await
                .map_err(|e| e.cleartext_not_found(path))?;
            let cleartext = decrypt_content(&ciphertext, &master_key, &context)
                .map_err(|e| StorageError::from_content(path, e))?;
            return Ok(Bytes::from(cleartext));
        };

        let ciphertext_length = storage
            .attributes(&content)
            .await
            .map_err(|e| e.cleartext_not_found(path))?
            .size
            .ok_or_else(|| StorageError::Transport(format!("backend reported no size for {path}")))?;
        let cleartext_length = cleartext_size(ciphertext_length)
            .ok_or_else(|| StorageError::checksum(path, format!("invalid ciphertext size {ciphertext_length}")))?;
        let Some((first_chunk, chunk_range)) = covering_chunks(&range, cleartext_length) else {
            return Ok(Bytes::new());
        };
        trace!(first_chunk, ciphertext = ?chunk_range, "Reading covering chunks");

        let header_bytes = storage.read(&content, Some(0..HEADER_SIZE as u64)).await?;
        let header = FileHeader::decrypt(&header_bytes, &master_key, &context)
            .map_err(|e| StorageError::from_content(path, e))?;
        let expected = chunk_range.end - chunk_range.start;
        let chunks = storage.read(&content, Some(chunk_range)).await?;
        if chunks.len() as u64 != expected {
            return Err(StorageError::checksum(path, "ciphertext truncated"));
        }
        let plain = decrypt_chunks(&chunks, first_chunk, &header, &context)
            .map_err(|e| StorageError::from_content(path, e))?;

        let base = first_chunk * CHUNK_PLAINTEXT_SIZE as u64;
        let start = range.start - base;
        let end = range.end.min(cleartext_length) - base;
        // both offsets lie within the decrypted chunks
        #[allow(clippy::cast_possible_truncation)]
        Ok(Bytes::from(plain).slice(start as usize..end as usize))
    }
}
