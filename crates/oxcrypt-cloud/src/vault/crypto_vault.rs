//! A vault rooted at a remote path.
//!
//! [`CryptoVault`] owns the key material and the name and directory-ID
//! mappings of one vault. It talks to storage only through the capability
//! traits, so the same vault works over any backend.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::cache::NameCache;
use super::config::{
    MASTERKEY_FILE, VAULT_CONFIG_FILE, VaultConfigurationClaims, VaultOptions,
    create_vault_config, masterkey_file_name, validate_vault_claims,
};
use super::content::{
    ciphertext_size, cleartext_size, decrypt_dir_id_backup, encrypt_dir_id_backup,
};
use super::dir_ids::{DirId, DirectoryIdProvider};
use super::master_key::{MasterKeyFile, create_masterkey_file};
use super::name::{C9R_EXTENSION, C9S_EXTENSION, decrypt_filename, encrypt_filename, hash_dir_id, shortened_name};
use crate::crypto::MasterKey;
use crate::error::{Result, StorageError, VaultError};
use crate::features::{Storage, byte_stream};
use crate::path::{EntryType, Path, PathAttributes};

/// Folder holding the data directories.
pub const DATA_DIRECTORY: &str = "d";
/// Directory marker holding the directory's identifier.
pub const DIR_MARKER_FILE: &str = "dir.c9r";
/// Encrypted identifier backup inside each data directory.
pub const DIR_ID_BACKUP_FILE: &str = "dirid.c9r";
/// Full ciphertext name of a shortened entry.
pub const LONG_NAME_FILE: &str = "name.c9s";
/// Content of a shortened file entry.
pub const LONG_CONTENTS_FILE: &str = "contents.c9r";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    Uninitialized,
    Unlocked,
    Locked,
}

/// How a missing directory identifier is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMode {
    /// Missing identifier is `NotFound`
    Read,
    /// Missing identifier is generated and persisted
    Create,
}

struct UnlockedVault {
    master_key: Arc<MasterKey>,
    shortening_threshold: usize,
    vault_id: String,
}

enum VaultState {
    Uninitialized,
    Unlocked(UnlockedVault),
    Locked,
}

/// Ciphertext location of a cleartext entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextEntry {
    /// `<b64>.c9r` file or folder, or the `<tok>.c9s` folder of a long name
    pub node: Path,
    /// Full `.c9r` name when the entry is shortened
    pub long_name: Option<String>,
    /// Data directory of the parent
    pub parent_data_dir: Path,
    /// Cleartext entry type
    pub kind: EntryType,
}

impl CiphertextEntry {
    pub fn is_long(&self) -> bool {
        self.long_name.is_some()
    }

    pub fn is_directory(&self) -> bool {
        self.kind != EntryType::File
    }

    /// Object holding file content.
    pub fn content_path(&self) -> Path {
        if self.is_long() {
            self.node.child(LONG_CONTENTS_FILE, EntryType::File)
        } else {
            self.node.clone()
        }
    }

    pub fn marker_path(&self) -> Path {
        self.node.child(DIR_MARKER_FILE, EntryType::File)
    }

    pub fn long_name_path(&self) -> Path {
        self.node.child(LONG_NAME_FILE, EntryType::File)
    }
}

/// A data directory child decoded back to cleartext.
#[derive(Debug, Clone)]
pub struct DecodedEntry {
    pub name: String,
    pub entry: CiphertextEntry,
}

pub struct CryptoVault {
    home: Path,
    options: VaultOptions,
    state: RwLock<VaultState>,
    dir_ids: DirectoryIdProvider,
    names: NameCache,
}

impl fmt::Debug for CryptoVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoVault")
            .field("home", &self.home)
            .field("status", &self.status())
            .field("cached_dir_ids", &self.dir_ids.len())
            .finish_non_exhaustive()
    }
}

impl CryptoVault {
    pub fn new(home: Path, options: VaultOptions) -> Self {
        Self {
            home: home.with_kind(EntryType::Directory),
            options,
            state: RwLock::new(VaultState::Uninitialized),
            dir_ids: DirectoryIdProvider::new(),
            names: NameCache::new(),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn status(&self) -> VaultStatus {
        match &*self.state.read() {
            VaultState::Uninitialized => VaultStatus::Uninitialized,
            VaultState::Unlocked(_) => VaultStatus::Unlocked,
            VaultState::Locked => VaultStatus::Locked,
        }
    }

    pub fn directory_ids(&self) -> &DirectoryIdProvider {
        &self.dir_ids
    }

    /// Whether `path` is the vault root or below it.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.home)
    }

    pub fn is_home(&self, path: &Path) -> bool {
        path.as_str() == self.home.as_str()
    }

    pub fn vault_id(&self) -> Result<String> {
        self.with_unlocked(|u| u.vault_id.clone())
    }

    pub fn shortening_threshold(&self) -> Result<usize> {
        self.with_unlocked(|u| u.shortening_threshold)
    }

    pub fn master_key(&self) -> Result<Arc<MasterKey>> {
        self.with_unlocked(|u| Arc::clone(&u.master_key))
    }

    fn with_unlocked<T>(&self, f: impl FnOnce(&UnlockedVault) -> T) -> Result<T> {
        let home = self.home.absolute();
        match &*self.state.read() {
            VaultState::Unlocked(unlocked) => Ok(f(unlocked)),
            VaultState::Locked => Err(VaultError::Locked { home }.into()),
            VaultState::Uninitialized => Err(VaultError::Uninitialized { home }.into()),
        }
    }

    fn creation_failed(&self, reason: impl fmt::Display) -> StorageError {
        VaultError::CreationFailed {
            home: self.home.absolute(),
            reason: reason.to_string(),
        }
        .into()
    }

    fn invalid_configuration(&self, reason: impl fmt::Display) -> StorageError {
        VaultError::InvalidConfiguration {
            home: self.home.absolute(),
            reason: reason.to_string(),
        }
        .into()
    }

    /// Write the vault files under the home path and leave the vault unlocked.
    #[instrument(level = "info", skip(self, storage, passphrase), fields(home = %self.home))]
    pub async fn create(&self, storage: &dyn Storage, passphrase: &str) -> Result<()> {
        let config_path = self.home.child(VAULT_CONFIG_FILE, EntryType::File);
        if storage.find(&config_path).await? {
            return Err(StorageError::already_exists(&config_path));
        }

        let master_key = MasterKey::random().map_err(|e| self.creation_failed(e))?;
        let masterkey_json =
            create_masterkey_file(&master_key, passphrase, self.options.effective_scrypt_cost())
                .map_err(|e| self.creation_failed(e))?;
        let vault_id = Uuid::new_v4().to_string();
        let claims = VaultConfigurationClaims::new(&vault_id, self.options.shortening_threshold);
        let jwt = create_vault_config(&claims, &master_key).map_err(|e| self.creation_failed(e))?;

        if !storage.find(&self.home).await? {
            match storage.mkdir(&self.home).await {
                Ok(_) | Err(StorageError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        write_small(
            storage,
            &self.home.child(MASTERKEY_FILE, EntryType::File),
            masterkey_json.into_bytes(),
        )
        .await?;
        write_small(storage, &config_path, jwt.into_bytes()).await?;

        let root_data_dir = data_directory(&self.home, &DirId::root(), &master_key)?;
        create_data_directory(storage, &root_data_dir, &DirId::root(), &master_key).await?;

        *self.state.write() = VaultState::Unlocked(UnlockedVault {
            master_key: Arc::new(master_key),
            shortening_threshold: self.options.shortening_threshold,
            vault_id,
        });
        info!("Vault created");
        Ok(())
    }

    /// Read the vault files and unlock with `passphrase`.
    #[instrument(level = "info", skip(self, storage, passphrase), fields(home = %self.home))]
    pub async fn unlock(&self, storage: &dyn Storage, passphrase: &str) -> Result<()> {
        let config_path = self.home.child(VAULT_CONFIG_FILE, EntryType::File);
        let jwt = read_utf8(storage, &config_path).await?;

        let masterkey_name = masterkey_file_name(&jwt).map_err(|e| self.invalid_configuration(e))?;
        let masterkey_json =
            read_utf8(storage, &self.home.child(&masterkey_name, EntryType::File)).await?;
        let masterkey_file: MasterKeyFile = serde_json::from_str(&masterkey_json)
            .map_err(|e| self.invalid_configuration(format!("{MASTERKEY_FILE}: {e}")))?;

        let master_key = masterkey_file.unlock(passphrase).map_err(|source| {
            warn!(error = %source, "Unlock failed");
            VaultError::LoginFailure {
                home: self.home.absolute(),
                source,
            }
        })?;

        let claims = validate_vault_claims(&jwt, &master_key)
            .map_err(|e| self.invalid_configuration(e))?;

        self.names.clear();
        self.dir_ids.clear();
        *self.state.write() = VaultState::Unlocked(UnlockedVault {
            master_key: Arc::new(master_key),
            shortening_threshold: claims.shortening_threshold(),
            vault_id: claims.jti.clone(),
        });
        info!(shortening_threshold = claims.shortening_threshold(), "Vault unlocked");
        Ok(())
    }

    /// Drop the key material and forget all cached mappings.
    #[instrument(level = "info", skip(self), fields(home = %self.home))]
    pub fn lock(&self) {
        *self.state.write() = VaultState::Locked;
        self.dir_ids.clear();
        self.names.clear();
        info!("Vault locked");
    }

    /// Ciphertext name with `.c9r` suffix, cached per `(dir_id, name)`.
    pub fn encrypt_name(&self, dir_id: &DirId, name: &str) -> Result<String> {
        if let Some(cached) = self.names.get(dir_id.as_str(), name) {
            trace!(name, dir_id = %dir_id, "encrypted name cache hit");
            return Ok(format!("{cached}{C9R_EXTENSION}"));
        }
        let master_key = self.master_key()?;
        let encrypted = encrypt_filename(name, dir_id.as_str(), &master_key)
            .map_err(|e| StorageError::from_name(name, e))?;
        self.names.insert(dir_id.as_str(), name, encrypted.clone());
        Ok(format!("{encrypted}{C9R_EXTENSION}"))
    }

    pub fn decrypt_name(&self, dir_id: &DirId, ciphertext: &str) -> Result<String> {
        let master_key = self.master_key()?;
        decrypt_filename(ciphertext, dir_id.as_str(), &master_key).map_err(|e| {
            warn!(encrypted_name = ciphertext, error = %e, "Failed to decrypt name");
            StorageError::from_name(ciphertext, e)
        })
    }

    pub fn data_directory(&self, dir_id: &DirId) -> Result<Path> {
        data_directory(&self.home, dir_id, &*self.master_key()?)
    }

    /// Cache key of a cleartext directory: its segments below the home.
    fn relative_key(&self, path: &Path) -> Result<String> {
        path.strip_prefix(&self.home)
            .map(|segments| segments.join("/"))
            .ok_or_else(|| {
                StorageError::Unsupported(format!("{path} is outside the vault at {}", self.home))
            })
    }

    /// Identifier of the cleartext `directory`.
    ///
    /// Ancestors are always resolved in [`IdMode::Read`].
    pub fn directory_id<'a>(
        &'a self,
        storage: &'a dyn Storage,
        directory: &'a Path,
        mode: IdMode,
    ) -> BoxFuture<'a, Result<DirId>> {
        Box::pin(async move {
            let (id, _) = self.lookup_directory_id(storage, directory, mode).await?;
            Ok(id)
        })
    }

    /// Create the identifier of `directory`, returning it only if this call
    /// wrote the marker. `None` means another caller created it first.
    pub async fn claim_directory_id(&self, storage: &dyn Storage, directory: &Path) -> Result<Option<DirId>> {
        let (id, created) = self
            .lookup_directory_id(storage, directory, IdMode::Create)
            .await?;
        Ok(created.then_some(id))
    }

    async fn lookup_directory_id(
        &self,
        storage: &dyn Storage,
        directory: &Path,
        mode: IdMode,
    ) -> Result<(DirId, bool)> {
        let key = self.relative_key(directory)?;
        if key.is_empty() {
            self.with_unlocked(|_| ())?;
            return Ok((DirId::root(), false));
        }

        let created = AtomicBool::new(false);
        let id = self
            .dir_ids
            .resolve(&key, || async {
                let parent = directory
                    .parent()
                    .ok_or_else(|| StorageError::not_found(directory))?;
                let parent_id = self.directory_id(storage, &parent, IdMode::Read).await?;
                let entry = self.encrypt_entry(&parent_id, directory.name(), EntryType::Directory)?;
                self.load_or_create_marker(storage, directory, &entry, mode, &created)
                    .await
            })
            .await?;
        Ok((id, created.load(Ordering::Acquire)))
    }

    async fn load_or_create_marker(
        &self,
        storage: &dyn Storage,
        directory: &Path,
        entry: &CiphertextEntry,
        mode: IdMode,
        created: &AtomicBool,
    ) -> Result<DirId> {
        let marker = entry.marker_path();
        match storage.read(&marker, None).await {
            Ok(bytes) => {
                let raw = String::from_utf8(bytes.to_vec())
                    .map_err(|e| StorageError::corrupt(&marker, e))?;
                Ok(DirId::from_raw(raw.trim()))
            }
            Err(e) if e.is_not_found() && mode == IdMode::Create => {
                let id = DirId::random();
                debug!(directory = %directory, dir_id = %id, "Writing directory marker");
                write_small(storage, &marker, id.as_str().as_bytes().to_vec()).await?;
                created.store(true, Ordering::Release);
                Ok(id)
            }
            Err(e) if e.is_not_found() => Err(StorageError::not_found(directory)),
            Err(e) => Err(e),
        }
    }

    /// Ciphertext location of `name` inside the directory `parent_id`.
    pub fn encrypt_entry(&self, parent_id: &DirId, name: &str, kind: EntryType) -> Result<CiphertextEntry> {
        let parent_data_dir = self.data_directory(parent_id)?;
        let full_name = self.encrypt_name(parent_id, name)?;
        let kind = if kind == EntryType::File {
            EntryType::File
        } else {
            EntryType::Directory
        };

        if full_name.len() > self.shortening_threshold()? {
            let node = parent_data_dir.child(&shortened_name(&full_name), EntryType::Directory);
            Ok(CiphertextEntry {
                node,
                long_name: Some(full_name),
                parent_data_dir,
                kind,
            })
        } else {
            Ok(CiphertextEntry {
                node: parent_data_dir.child(&full_name, kind),
                long_name: None,
                parent_data_dir,
                kind,
            })
        }
    }

    /// Ciphertext location of the cleartext entry `path`.
    pub async fn resolve(&self, storage: &dyn Storage, path: &Path, mode: IdMode) -> Result<CiphertextEntry> {
        let parent = path
            .parent()
            .filter(|p| self.contains(p))
            .ok_or_else(|| StorageError::Unsupported(format!("{path} is the vault root")))?;
        let parent_id = self.directory_id(storage, &parent, mode).await?;
        self.encrypt_entry(&parent_id, path.name(), path.kind())
    }

    /// Decode one child of the data directory of `parent_id`.
    ///
    /// Returns `None` for the identifier backup and for foreign objects.
    pub async fn decrypt_entry(
        &self,
        storage: &dyn Storage,
        parent_id: &DirId,
        child: &Path,
    ) -> Result<Option<DecodedEntry>> {
        let node_name = child.name();
        if node_name == DIR_ID_BACKUP_FILE {
            return Ok(None);
        }
        let parent_data_dir = child
            .parent()
            .ok_or_else(|| StorageError::corrupt(child, "entry without parent"))?;

        if node_name.ends_with(C9S_EXTENSION) {
            if !child.is_directory() {
                return Err(StorageError::corrupt(child, "shortened entry is not a folder"));
            }
            let node = child.clone().with_kind(EntryType::Directory);
            let name_file = node.child(LONG_NAME_FILE, EntryType::File);
            let full_name = read_utf8(storage, &name_file).await?;
            let full_name = full_name.trim();
            if shortened_name(full_name) != node_name {
                return Err(StorageError::corrupt(&name_file, "name does not match its shortened token"));
            }
            let is_directory = storage
                .find(&node.child(DIR_MARKER_FILE, EntryType::File))
                .await?;
            let name = self.decrypt_name(parent_id, full_name)?;
            return Ok(Some(DecodedEntry {
                name,
                entry: CiphertextEntry {
                    node,
                    long_name: Some(full_name.to_string()),
                    parent_data_dir,
                    kind: if is_directory {
                        EntryType::Directory
                    } else {
                        EntryType::File
                    },
                },
            }));
        }

        if node_name.ends_with(C9R_EXTENSION) {
            let name = self.decrypt_name(parent_id, node_name)?;
            let kind = if child.is_directory() {
                EntryType::Directory
            } else {
                EntryType::File
            };
            return Ok(Some(DecodedEntry {
                name,
                entry: CiphertextEntry {
                    node: child.clone().with_kind(kind),
                    long_name: None,
                    parent_data_dir,
                    kind,
                },
            }));
        }

        debug!(entry = %child, "Skipping foreign object in data directory");
        Ok(None)
    }

    /// Create the data directory of `dir_id` and its identifier backup.
    pub async fn create_data_directory(&self, storage: &dyn Storage, dir_id: &DirId) -> Result<Path> {
        let master_key = self.master_key()?;
        let data_dir = data_directory(&self.home, dir_id, &master_key)?;
        create_data_directory(storage, &data_dir, dir_id, &master_key).await?;
        Ok(data_dir)
    }

    /// Decrypt the `dirid.c9r` backup of a data directory.
    pub async fn read_dir_id_backup(&self, storage: &dyn Storage, data_dir: &Path) -> Result<DirId> {
        let backup = data_dir.child(DIR_ID_BACKUP_FILE, EntryType::File);
        let bytes = storage.read(&backup, None).await?;
        let raw = decrypt_dir_id_backup(&bytes, &*self.master_key()?)
            .map_err(|e| StorageError::from_content(&backup, e))?;
        Ok(DirId::from_raw(raw))
    }

    /// Forget the cached identifiers of `directory` and its descendants.
    pub fn forget_directory(&self, directory: &Path) {
        if let Ok(key) = self.relative_key(directory) {
            self.dir_ids.remove(&key);
        }
    }

    /// Re-key cached identifiers after `from` moved to `to`.
    pub fn rename_directory(&self, from: &Path, to: &Path) {
        if let (Ok(from), Ok(to)) = (self.relative_key(from), self.relative_key(to)) {
            self.dir_ids.rename(&from, &to);
        }
    }

    /// Record the identifier of a directory created by this session.
    pub fn remember_directory(&self, directory: &Path, id: DirId) {
        if let Ok(key) = self.relative_key(directory) {
            self.dir_ids.insert(&key, id);
        }
    }

    /// Ciphertext attributes converted to the cleartext view.
    pub fn cleartext_attributes(&self, kind: EntryType, ciphertext: &PathAttributes) -> PathAttributes {
        let mut attributes = PathAttributes {
            modified: ciphertext.modified,
            version_id: ciphertext.version_id.clone(),
            ..PathAttributes::default()
        };
        if kind == EntryType::File {
            attributes.size = ciphertext.size.and_then(cleartext_size);
        }
        attributes
    }

    /// Ciphertext length of a cleartext payload.
    pub fn ciphertext_length(&self, cleartext_length: u64) -> u64 {
        ciphertext_size(cleartext_length)
    }
}

fn data_directory(home: &Path, dir_id: &DirId, master_key: &MasterKey) -> Result<Path> {
    let hash = hash_dir_id(dir_id.as_str(), master_key)
        .map_err(|e| StorageError::from_name(dir_id, e))?;
    let (prefix, rest) = hash.split_at(2);
    Ok(home
        .child(DATA_DIRECTORY, EntryType::Directory)
        .child(prefix, EntryType::Directory)
        .child(rest, EntryType::Directory))
}

async fn create_data_directory(
    storage: &dyn Storage,
    data_dir: &Path,
    dir_id: &DirId,
    master_key: &MasterKey,
) -> Result<()> {
    match storage.mkdir(data_dir).await {
        Ok(_) | Err(StorageError::AlreadyExists { .. }) => {}
        Err(e) => return Err(e),
    }
    let backup = encrypt_dir_id_backup(dir_id.as_str(), master_key)
        .map_err(|e| StorageError::from_encryption(data_dir, e))?;
    write_small(storage, &data_dir.child(DIR_ID_BACKUP_FILE, EntryType::File), backup).await?;
    trace!(data_dir = %data_dir, "Data directory created");
    Ok(())
}

pub(crate) async fn write_small(storage: &dyn Storage, path: &Path, data: Vec<u8>) -> Result<()> {
    let length = data.len() as u64;
    storage.write(path, byte_stream(Bytes::from(data)), length).await?;
    Ok(())
}

async fn read_utf8(storage: &dyn Storage, path: &Path) -> Result<String> {
    let bytes = storage.read(path, None).await?;
    String::from_utf8(bytes.to_vec()).map_err(|e| StorageError::corrupt(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStorage;
    use crate::features::{Find, ListService};

    fn options() -> VaultOptions {
        VaultOptions::default().scrypt_cost_log2(10)
    }

    async fn created() -> (MemoryStorage, CryptoVault) {
        let storage = MemoryStorage::new();
        let vault = CryptoVault::new(Path::directory("/v"), options());
        vault.create(&storage, "secret").await.unwrap();
        (storage, vault)
    }

    #[tokio::test]
    async fn test_create_layout() {
        let (storage, vault) = created().await;
        assert_eq!(vault.status(), VaultStatus::Unlocked);
        assert!(storage.contains("/v/vault.cryptomator"));
        assert!(storage.contains("/v/masterkey.cryptomator"));

        let root = vault.data_directory(&DirId::root()).unwrap();
        assert_eq!(root.depth(), 4);
        assert!(storage.find(&root).await.unwrap());
        assert_eq!(vault.read_dir_id_backup(&storage, &root).await.unwrap(), DirId::root());
    }

    #[tokio::test]
    async fn test_create_twice_rejected() {
        let (storage, vault) = created().await;
        let err = vault.create(&storage, "secret").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_unlock_and_wrong_passphrase() {
        let (storage, creator) = created().await;
        let vault = CryptoVault::new(Path::directory("/v"), options());

        let err = vault.unlock(&storage, "wrong").await.unwrap_err();
        assert!(matches!(err, StorageError::Vault(VaultError::LoginFailure { .. })));
        assert_eq!(vault.status(), VaultStatus::Uninitialized);

        vault.unlock(&storage, "secret").await.unwrap();
        assert_eq!(vault.vault_id().unwrap(), creator.vault_id().unwrap());
        assert_eq!(
            vault.data_directory(&DirId::root()).unwrap(),
            creator.data_directory(&DirId::root()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_locked_vault_refuses_codec() {
        let (_storage, vault) = created().await;
        let id = DirId::random();
        vault.encrypt_name(&id, "a.txt").unwrap();

        vault.lock();
        assert_eq!(vault.status(), VaultStatus::Locked);
        let err = vault.encrypt_name(&id, "a.txt").unwrap_err();
        assert!(matches!(err, StorageError::Vault(VaultError::Locked { .. })));
        assert!(vault.directory_ids().is_empty());
    }

    #[tokio::test]
    async fn test_name_roundtrip_and_determinism() {
        let (_storage, vault) = created().await;
        let id = DirId::random();
        let first = vault.encrypt_name(&id, "report.pdf").unwrap();
        assert!(first.ends_with(".c9r"));
        assert_eq!(vault.encrypt_name(&id, "report.pdf").unwrap(), first);
        assert_ne!(vault.encrypt_name(&DirId::root(), "report.pdf").unwrap(), first);
        assert_eq!(vault.decrypt_name(&id, &first).unwrap(), "report.pdf");

        let err = vault.decrypt_name(&DirId::root(), &first).unwrap_err();
        assert!(matches!(err, StorageError::CorruptCiphertext { .. }));
    }

    #[tokio::test]
    async fn test_directory_id_modes() {
        let (storage, vault) = created().await;
        let dir = Path::directory("/v/a");

        let err = vault.directory_id(&storage, &dir, IdMode::Read).await.unwrap_err();
        assert!(err.is_not_found());

        let id = vault.directory_id(&storage, &dir, IdMode::Create).await.unwrap();
        assert!(!id.is_root());
        assert_eq!(vault.directory_id(&storage, &dir, IdMode::Read).await.unwrap(), id);

        // a fresh vault instance reads the persisted marker
        let other = CryptoVault::new(Path::directory("/v"), options());
        other.unlock(&storage, "secret").await.unwrap();
        assert_eq!(other.directory_id(&storage, &dir, IdMode::Read).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_long_names_shortened() {
        let storage = MemoryStorage::new();
        let vault = CryptoVault::new(
            Path::directory("/v"),
            options().shortening_threshold(40),
        );
        vault.create(&storage, "secret").await.unwrap();

        let entry = vault
            .encrypt_entry(&DirId::root(), &"x".repeat(60), EntryType::File)
            .unwrap();
        assert!(entry.is_long());
        assert!(entry.node.name().ends_with(".c9s"));
        assert!(entry.node.is_directory());
        assert_eq!(entry.content_path().name(), LONG_CONTENTS_FILE);

        let short = vault.encrypt_entry(&DirId::root(), "x", EntryType::File).unwrap();
        assert!(!short.is_long());
        assert_eq!(short.content_path(), short.node);
    }

    #[tokio::test]
    async fn test_decrypt_entry_skips_backup() {
        let (storage, vault) = created().await;
        let root = vault.data_directory(&DirId::root()).unwrap();
        let children = storage.list(&root).await.unwrap();
        assert_eq!(children.len(), 1);
        assert!(
            vault
                .decrypt_entry(&storage, &DirId::root(), &children[0])
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_cleartext_attributes() {
        let vault = CryptoVault::new(Path::directory("/v"), options());
        let attrs = PathAttributes::default().with_size(ciphertext_size(100));
        assert_eq!(vault.cleartext_attributes(EntryType::File, &attrs).size, Some(100));
        assert_eq!(vault.cleartext_attributes(EntryType::Directory, &attrs).size, None);
    }
}
