//! Cryptomator vaults on remote storage.
//!
//! A backend exposes its operations as capability traits ([`features`]).
//! Paths inside an unlocked vault go through decorators that encrypt names,
//! keep directory identifiers and encrypt content before reaching the
//! backend. [`Session`] routes every call to the right implementation and
//! runs segmented uploads of large objects.

pub mod backend;
pub mod checksum;
pub mod crypto;
pub mod error;
pub mod features;
pub mod keysync;
pub mod path;
pub mod session;
pub mod upload;
pub mod vault;

pub use backend::{LocalStorage, MemoryStorage};
pub use checksum::Checksum;
pub use error::{ErrorCategory, Result, StorageError, VaultError};
pub use features::{Storage, TransferStatus, WriteReply, byte_stream};
pub use path::{EntryType, Path, PathAttributes};
pub use session::Session;
pub use upload::{UploadConfig, UploadSource};
pub use vault::{CryptoVault, VaultOptions, VaultRegistry};
