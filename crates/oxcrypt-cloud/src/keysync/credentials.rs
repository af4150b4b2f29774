use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};

/// Passphrases remembered for later runs, keyed by `(service, account)`.
///
/// Owned by the caller and passed to the processor, so tests and embedders
/// decide whether anything persists.
#[derive(Default)]
pub struct PasswordStore {
    entries: RwLock<HashMap<(String, String), SecretString>>,
}

impl std::fmt::Debug for PasswordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordStore")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl PasswordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_password(&self, service: &str, account: &str) -> Option<SecretString> {
        self.entries
            .read()
            .get(&(service.to_string(), account.to_string()))
            .map(|secret| SecretString::from(secret.expose_secret().to_owned()))
    }

    pub fn add_password(&self, service: &str, account: &str, password: &SecretString) {
        self.entries.write().insert(
            (service.to_string(), account.to_string()),
            SecretString::from(password.expose_secret().to_owned()),
        );
    }

    pub fn remove_password(&self, service: &str, account: &str) -> bool {
        self.entries
            .write()
            .remove(&(service.to_string(), account.to_string()))
            .is_some()
    }
}

/// Answer to a passphrase prompt.
#[derive(Debug)]
pub struct PassphraseCredentials {
    pub passphrase: SecretString,
    /// Remember the passphrase in the [`PasswordStore`]
    pub save: bool,
}

impl PassphraseCredentials {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: SecretString::from(passphrase.into()),
            save: false,
        }
    }

    #[must_use]
    pub fn save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }
}

/// Asks the user for the encryption passphrase.
#[async_trait]
pub trait PassphrasePrompt: Send + Sync {
    /// `None` when the user cancels.
    async fn prompt(&self, title: &str, reason: &str) -> Option<PassphraseCredentials>;
}
