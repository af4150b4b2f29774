//! Vault format, codecs and lifecycle

pub mod cache;
pub mod config;
pub mod content;
pub mod content_stream;
pub mod crypto_vault;
pub mod dir_ids;
pub mod master_key;
pub mod name;
pub mod registry;

pub use cache::NameCache;
pub use config::{
    DEFAULT_SHORTENING_THRESHOLD, VaultConfigurationClaims, VaultOptions, create_vault_config,
    validate_vault_claims,
};
pub use crypto_vault::{CiphertextEntry, CryptoVault, DecodedEntry, IdMode, VaultStatus};
pub use dir_ids::{DirId, DirectoryIdProvider};
pub use master_key::{MasterKeyFile, create_masterkey_file};
pub use registry::VaultRegistry;
