//! Background maintenance of shared file keys.
//!
//! Accounts of an enterprise key-exchange service hold an X25519 key pair.
//! Every file key is stored once per user, wrapped for that user's public
//! key. When a file is shared with a new user, the service lists the missing
//! `(user, file)` pairs and a member that already holds the file key wraps
//! it for the newcomer. [`KeyMaintenanceTask`] does this periodically.

pub mod api;
pub mod credentials;
pub mod crypto;
pub mod processor;
pub mod scheduler;

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::crypto::CryptoError;
use crate::error::StorageError;

pub use api::{KeyExchangeApi, MissingKeysResponse, UserFileKeySetBatchRequest, UserFileKeySetRequest};
pub use credentials::{PassphraseCredentials, PassphrasePrompt, PasswordStore};
pub use crypto::{PlainFileKey, UserKeyPair};
pub use processor::MissingKeysProcessor;
pub use scheduler::{KeyMaintenanceHandle, KeyMaintenanceTask};

#[derive(Error, Debug)]
pub enum KeySyncError {
    #[error("Key exchange API error: {0}")]
    Api(String),

    #[error("Login canceled")]
    LoginCanceled,

    #[error("Invalid user key pair: {0}")]
    InvalidKeyPair(String),

    #[error("[INTEGRITY VIOLATION] Invalid file key for file {file_id}: {reason}")]
    InvalidFileKey { file_id: u64, reason: String },

    #[error("No public key listed for user {0}")]
    MissingPublicKey(u64),

    #[error("No file key listed for file {0}")]
    MissingFileKey(u64),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<KeySyncError> for StorageError {
    fn from(err: KeySyncError) -> Self {
        match err {
            KeySyncError::LoginCanceled => StorageError::LoginCanceled,
            other => StorageError::Transport(other.to_string()),
        }
    }
}

pub const DEFAULT_KEYSYNC_PERIOD: Duration = Duration::from_secs(120);

/// Schedule of the key-maintenance task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySyncConfig {
    pub period: Duration,
}

impl Default for KeySyncConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_KEYSYNC_PERIOD,
        }
    }
}

impl KeySyncConfig {
    /// Defaults with `OXCRYPT_KEYSYNC_PERIOD_SECS` applied.
    pub fn from_env() -> Self {
        Self::from_value(std::env::var("OXCRYPT_KEYSYNC_PERIOD_SECS").ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Self {
        let config = Self::default();
        let Some(raw) = value else {
            return config;
        };
        match raw.trim().parse::<u64>() {
            Ok(secs) => config.period(Duration::from_secs(secs)),
            Err(_) => {
                warn!(value = raw, "Ignoring unparsable OXCRYPT_KEYSYNC_PERIOD_SECS");
                config
            }
        }
    }

    /// Interval between runs, at least one millisecond.
    #[must_use]
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        assert_eq!(KeySyncConfig::default().period, Duration::from_secs(120));
        assert_eq!(KeySyncConfig::from_value(Some("30")).period, Duration::from_secs(30));
        assert_eq!(KeySyncConfig::from_value(Some("soon")).period, DEFAULT_KEYSYNC_PERIOD);
        assert_eq!(
            KeySyncConfig::default().period(Duration::ZERO).period,
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_cancel_maps_to_storage_error() {
        assert!(matches!(
            StorageError::from(KeySyncError::LoginCanceled),
            StorageError::LoginCanceled
        ));
    }
}
