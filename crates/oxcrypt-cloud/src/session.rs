//! A backend together with the vaults attached to it.
//!
//! [`Session`] implements every capability. Each call looks up the vault
//! governing the path in the session's [`VaultRegistry`] and goes through the
//! vault decorators, or straight to the backend for paths outside any vault.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::{DeleteFailure, Result, StorageError};
use crate::features::crypto::CryptoFeatures;
use crate::features::{
    AttributesFinder, ByteStream, Delete, Directory, Find, ListService, ManifestWriter, Move, Read,
    Storage, TransferStatus, Write, WriteReply,
};
use crate::path::{EntryType, Path, PathAttributes};
use crate::upload::{Manifest, SegmentedUpload, UploadConfig, UploadSource};
use crate::vault::content_stream::EncryptedSource;
use crate::vault::{CryptoVault, VaultOptions, VaultRegistry};

pub struct Session<S> {
    backend: S,
    vaults: VaultRegistry,
    upload: UploadConfig,
}

impl<S: Storage + Clone + 'static> Session<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            vaults: VaultRegistry::new(),
            upload: UploadConfig::default(),
        }
    }

    #[must_use]
    pub fn with_upload_config(mut self, config: UploadConfig) -> Self {
        self.upload = config;
        self
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn vaults(&self) -> &VaultRegistry {
        &self.vaults
    }

    pub fn upload_config(&self) -> &UploadConfig {
        &self.upload
    }

    /// Decorators of the vault governing `path`, if any.
    fn features(&self, path: &Path) -> Option<CryptoFeatures<S>> {
        self.vaults
            .find(path)
            .map(|vault| CryptoFeatures::new(&self.backend, &vault))
    }

    fn attach(&self, home: &Path, options: VaultOptions) -> Result<Arc<CryptoVault>> {
        if let Some(outer) = self.vaults.find(home) {
            return Err(StorageError::Unsupported(format!(
                "vault at {home} would be nested in the vault at {}",
                outer.home()
            )));
        }
        Ok(Arc::new(CryptoVault::new(home.clone(), options)))
    }

    /// Create a vault at `home` and attach it, unlocked.
    #[instrument(level = "info", skip(self, passphrase, options), fields(home = %home))]
    pub async fn create_vault(&self, home: &Path, passphrase: &str, options: VaultOptions) -> Result<Arc<CryptoVault>> {
        let vault = self.attach(home, options)?;
        vault.create(&self.backend, passphrase).await?;
        self.vaults.add(Arc::clone(&vault))?;
        Ok(vault)
    }

    /// Unlock the existing vault at `home` and attach it.
    #[instrument(level = "info", skip(self, passphrase, options), fields(home = %home))]
    pub async fn unlock_vault(&self, home: &Path, passphrase: &str, options: VaultOptions) -> Result<Arc<CryptoVault>> {
        let vault = self.attach(home, options)?;
        vault.unlock(&self.backend, passphrase).await?;
        self.vaults.add(Arc::clone(&vault))?;
        Ok(vault)
    }

    /// Lock and detach the vault at `home`. Returns whether one was attached.
    pub fn lock_vault(&self, home: &Path) -> bool {
        match self.vaults.remove(home) {
            Some(vault) => {
                vault.lock();
                true
            }
            None => false,
        }
    }

    /// Lock and detach every vault.
    pub fn close(&self) {
        info!(vaults = self.vaults.len(), "Closing session");
        self.vaults.close();
    }

    /// Upload `source` to `target`, in segments when it is large enough.
    ///
    /// Vault files are encrypted chunk by chunk as each segment is read and
    /// the ciphertext goes to the ciphertext location. Fresh ciphertext
    /// differs on every attempt, so resumed segments of vault files are
    /// always verified against the listed checksum.
    #[instrument(level = "info", skip(self, source, cancel), fields(target = %target, length = status.length))]
    pub async fn upload(
        &self,
        target: &Path,
        source: Arc<dyn UploadSource>,
        status: TransferStatus,
        cancel: &CancellationToken,
    ) -> Result<WriteReply> {
        if !self.upload.is_segmented(status.length) {
            debug!("Single request upload");
            let stream = source
                .open(0..source.len())
                .await
                .map_err(|e| StorageError::io(target, e))?;
            return tokio::select! {
                biased;
                () = cancel.cancelled() => Err(StorageError::ConnectionCanceled),
                reply = self.write(target, stream, status.length) => reply,
            };
        }

        let Some(features) = self.features(target) else {
            let engine = SegmentedUpload::new(self.backend.clone(), self.upload.clone());
            return Ok(engine.upload(target, source, status, cancel).await?.reply);
        };

        let entry = features.write.prepare(target).await?;
        let ciphertext = EncryptedSource::new(source, features.write.encryptor(target)?);
        let ciphertext_length = ciphertext.len();
        let engine = SegmentedUpload::new(
            self.backend.clone(),
            self.upload.clone().verify_resumed_segments(true),
        );
        let summary = engine
            .upload(
                &entry.content_path(),
                Arc::new(ciphertext),
                TransferStatus::new(ciphertext_length).append(status.append),
                cancel,
            )
            .await?;
        Ok(WriteReply {
            path: target.clone().with_kind(EntryType::File),
            checksum: summary.reply.checksum,
        })
    }
}

#[async_trait]
impl<S: Storage + Clone + 'static> Directory for Session<S> {
    async fn mkdir(&self, path: &Path) -> Result<Path> {
        match self.features(path) {
            Some(features) => features.directory.mkdir(path).await,
            None => self.backend.mkdir(path).await,
        }
    }
}

#[async_trait]
impl<S: Storage + Clone + 'static> Move for Session<S> {
    async fn move_to(&self, source: &Path, target: &Path, overwrite: bool) -> Result<Path> {
        let from = self.vaults.find(source);
        let to = self.vaults.find(target);
        match (from, to) {
            (None, None) => self.backend.move_to(source, target, overwrite).await,
            (Some(a), Some(b)) if Arc::ptr_eq(&a, &b) => {
                CryptoFeatures::new(&self.backend, &a)
                    .rename
                    .move_to(source, target, overwrite)
                    .await
            }
            _ => Err(StorageError::Unsupported(format!(
                "move of {source} to {target} crosses a vault boundary"
            ))),
        }
    }
}

#[async_trait]
impl<S: Storage + Clone + 'static> Delete for Session<S> {
    async fn delete(&self, paths: &[Path]) -> Result<()> {
        let mut ordered: Vec<&Path> = paths.iter().collect();
        ordered.sort_by_key(|p| std::cmp::Reverse(p.depth()));

        let mut failures = Vec::new();
        for path in ordered {
            let single = std::slice::from_ref(path);
            let result = match self.features(path) {
                Some(features) => features.delete.delete(single).await,
                None => self.backend.delete(single).await,
            };
            match result {
                Ok(()) => {}
                Err(StorageError::PartialDelete(mut nested)) => failures.append(&mut nested),
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

#[async_trait]
impl<S: Storage + Clone + 'static> Find for Session<S> {
    async fn find(&self, path: &Path) -> Result<bool> {
        match self.features(path) {
            Some(features) => features.find.find(path).await,
            None => self.backend.find(path).await,
        }
    }
}

#[async_trait]
impl<S: Storage + Clone + 'static> AttributesFinder for Session<S> {
    async fn attributes(&self, path: &Path) -> Result<PathAttributes> {
        match self.features(path) {
            Some(features) => features.attributes.attributes(path).await,
            None => self.backend.attributes(path).await,
        }
    }
}

#[async_trait]
impl<S: Storage + Clone + 'static> Write for Session<S> {
    async fn write(&self, path: &Path, stream: ByteStream, length: u64) -> Result<WriteReply> {
        match self.features(path) {
            Some(features) => features.write.write(path, stream, length).await,
            None => self.backend.write(path, stream, length).await,
        }
    }
}

#[async_trait]
impl<S: Storage + Clone + 'static> Read for Session<S> {
    async fn read(&self, path: &Path, range: Option<Range<u64>>) -> Result<Bytes> {
        match self.features(path) {
            Some(features) => features.read.read(path, range).await,
            None => self.backend.read(path, range).await,
        }
    }
}

#[async_trait]
impl<S: Storage + Clone + 'static> ListService for Session<S> {
    async fn list(&self, directory: &Path) -> Result<Vec<Path>> {
        match self.features(directory) {
            Some(features) => features.list.list(directory).await,
            None => self.backend.list(directory).await,
        }
    }
}

#[async_trait]
impl<S: Storage + Clone + 'static> ManifestWriter for Session<S> {
    /// Manifests name raw segment objects, so they are only accepted
    /// outside vaults. Vault files use [`Session::upload`].
    async fn commit_manifest(&self, target: &Path, manifest: &Manifest) -> Result<WriteReply> {
        if self.vaults.contains(target) {
            return Err(StorageError::Unsupported(format!(
                "manifest commit to the vault path {target}"
            )));
        }
        self.backend.commit_manifest(target, manifest).await
    }
}
