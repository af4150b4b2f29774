//! Error types for the crate
//!
//! [`StorageError`] is the uniform error returned by every capability, whether
//! it is served by a plain backend or by the vault decorators. Lower layers
//! keep their own enums with context structures and convert into it.

use std::fmt;
use std::io;

use thiserror::Error;

pub use crate::crypto::CryptoError;
pub use crate::keysync::KeySyncError;
pub use crate::vault::config::{ClaimValidationError, VaultConfigCreationError};
pub use crate::vault::content::{ContentDecryptionError, ContentEncryptionError, FileContext};
pub use crate::vault::master_key::MasterKeyCreationError;
pub use crate::vault::name::{NameContext, NameError};

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    /// Content or name failed authentication, or a checksum mismatched
    Integrity,
    Canceled,
    Authentication,
    Transport,
    Unsupported,
}

/// Vault lifecycle and configuration errors.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault at {home} is locked")]
    Locked { home: String },

    #[error("Vault at {home} has not been unlocked")]
    Uninitialized { home: String },

    /// Wrong passphrase, or a master-key file that fails its integrity check
    #[error("Login failed for vault at {home}: {source}")]
    LoginFailure {
        home: String,
        #[source]
        source: CryptoError,
    },

    #[error("Invalid vault configuration at {home}: {reason}")]
    InvalidConfiguration { home: String, reason: String },

    #[error("A vault is already registered at {home}")]
    AlreadyRegistered { home: String },

    #[error("Failed to create vault at {home}: {reason}")]
    CreationFailed { home: String, reason: String },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// One path that could not be deleted.
#[derive(Debug)]
pub struct DeleteFailure {
    pub path: String,
    pub error: StorageError,
}

impl fmt::Display for DeleteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.error)
    }
}

fn join_failures(failures: &[DeleteFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Conflict at {path}: {reason}")]
    Conflict { path: String, reason: String },

    #[error("Access denied to {path}: {reason}")]
    Forbidden { path: String, reason: String },

    /// Content integrity failure. Always fatal to the enclosing transfer.
    #[error("[INTEGRITY VIOLATION] Checksum failure for {path}: {reason}")]
    Checksum { path: String, reason: String },

    /// Malformed or undecryptable ciphertext name or structure.
    #[error("[INTEGRITY VIOLATION] Corrupt ciphertext at {path}: {reason}")]
    CorruptCiphertext { path: String, reason: String },

    #[error("Login canceled")]
    LoginCanceled,

    #[error("Connection canceled")]
    ConnectionCanceled,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Failed to delete {} path(s): {}", .0.len(), join_failures(.0))]
    PartialDelete(Vec<DeleteFailure>),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl StorageError {
    pub fn not_found(path: impl fmt::Display) -> Self {
        StorageError::NotFound {
            path: path.to_string(),
        }
    }

    pub fn already_exists(path: impl fmt::Display) -> Self {
        StorageError::AlreadyExists {
            path: path.to_string(),
        }
    }

    pub fn conflict(path: impl fmt::Display, reason: impl Into<String>) -> Self {
        StorageError::Conflict {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        StorageError::CorruptCiphertext {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn checksum(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        StorageError::Checksum {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl fmt::Display, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_string(),
            source,
        }
    }

    /// Map a name codec failure on `path`.
    pub fn from_name(path: impl fmt::Display, err: NameError) -> Self {
        match err {
            NameError::KeyAccess(e) => VaultError::Crypto(CryptoError::KeyAccess(e)).into(),
            other => StorageError::corrupt(path, other),
        }
    }

    /// Map a content codec failure on `path`. Authentication and truncation
    /// failures surface as [`StorageError::Checksum`].
    pub fn from_content(path: impl fmt::Display, err: ContentDecryptionError) -> Self {
        match err {
            ContentDecryptionError::KeyAccess(e) => {
                VaultError::Crypto(CryptoError::KeyAccess(e)).into()
            }
            other => StorageError::checksum(path, other),
        }
    }

    /// Map a content encryption failure on `path`.
    pub fn from_encryption(path: impl fmt::Display, err: ContentEncryptionError) -> Self {
        match err {
            ContentEncryptionError::KeyAccess(e) => {
                VaultError::Crypto(CryptoError::KeyAccess(e)).into()
            }
            other => StorageError::Transport(format!("encrypting {path}: {other}")),
        }
    }

    /// Replace a backend `NotFound` on a ciphertext path with one naming
    /// the cleartext `path`.
    #[must_use]
    pub fn cleartext_not_found(self, path: impl fmt::Display) -> Self {
        if self.is_not_found() {
            StorageError::not_found(path)
        } else {
            self
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            StorageError::NotFound { .. } => ErrorCategory::NotFound,
            StorageError::AlreadyExists { .. } | StorageError::Conflict { .. } => {
                ErrorCategory::Conflict
            }
            StorageError::Checksum { .. } | StorageError::CorruptCiphertext { .. } => {
                ErrorCategory::Integrity
            }
            StorageError::LoginCanceled | StorageError::ConnectionCanceled => {
                ErrorCategory::Canceled
            }
            StorageError::Forbidden { .. } => ErrorCategory::Authentication,
            StorageError::Vault(err) => match err {
                VaultError::Locked { .. }
                | VaultError::Uninitialized { .. }
                | VaultError::LoginFailure { .. } => ErrorCategory::Authentication,
                VaultError::InvalidConfiguration { .. }
                | VaultError::CreationFailed { .. }
                | VaultError::Crypto(_) => ErrorCategory::Integrity,
                VaultError::AlreadyRegistered { .. } => ErrorCategory::Conflict,
            },
            StorageError::Io { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => ErrorCategory::NotFound,
                io::ErrorKind::PermissionDenied => ErrorCategory::Authentication,
                io::ErrorKind::AlreadyExists => ErrorCategory::Conflict,
                _ => ErrorCategory::Transport,
            },
            StorageError::Transport(_) => ErrorCategory::Transport,
            StorageError::PartialDelete(failures) => failures
                .first()
                .map_or(ErrorCategory::Transport, |f| f.error.category()),
            StorageError::Unsupported(_) => ErrorCategory::Unsupported,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
