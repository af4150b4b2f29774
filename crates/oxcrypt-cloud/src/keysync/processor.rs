use std::collections::HashMap;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::{debug, info, instrument, warn};

use super::KeySyncError;
use super::api::{
    FileFileKeys, KeyExchangeApi, UserAccount, UserFileKeySetBatchRequest, UserFileKeySetRequest,
    UserKeyPairContainer, UserUserPublicKey,
};
use super::credentials::{PassphrasePrompt, PasswordStore};
use super::crypto::{UserKeyPair, encrypt_file_key};
use crate::crypto::CryptoError;

const PROMPT_TITLE: &str = "Enter your encryption password";

/// One run of missing-key maintenance.
pub struct MissingKeysProcessor {
    api: Arc<dyn KeyExchangeApi>,
    prompt: Arc<dyn PassphrasePrompt>,
    passwords: Arc<PasswordStore>,
    /// Service the stored passphrase belongs to, usually the host name
    service: String,
}

impl MissingKeysProcessor {
    pub fn new(
        api: Arc<dyn KeyExchangeApi>,
        prompt: Arc<dyn PassphrasePrompt>,
        passwords: Arc<PasswordStore>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            api,
            prompt,
            passwords,
            service: service.into(),
        }
    }

    /// Fill every missing file key the service reports and return the
    /// submitted key sets.
    ///
    /// Failures are logged and end the run with nothing submitted.
    pub async fn process(&self) -> Vec<UserFileKeySetRequest> {
        match self.try_process().await {
            Ok(processed) => processed,
            Err(KeySyncError::LoginCanceled) => {
                warn!("Passphrase prompt canceled");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Failure while processing missing file keys");
                Vec::new()
            }
        }
    }

    #[instrument(level = "info", skip(self), fields(service = %self.service))]
    pub async fn try_process(&self) -> Result<Vec<UserFileKeySetRequest>, KeySyncError> {
        let account = self.api.user_account().await?;
        if !account.is_encryption_enabled {
            debug!(user = %account.user_name, "Encryption disabled for account");
            return Ok(Vec::new());
        }
        let container = self.api.user_key_pair().await?;
        let key_pair = self.unlock(&account, &container).await?;

        let missing = self.api.missing_file_keys().await?;
        let users: HashMap<u64, &UserUserPublicKey> =
            missing.users.iter().map(|user| (user.id, user)).collect();
        let files: HashMap<u64, &FileFileKeys> =
            missing.files.iter().map(|file| (file.id, file)).collect();

        let mut processed = Vec::with_capacity(missing.items.len());
        for item in &missing.items {
            let user = users
                .get(&item.user_id)
                .ok_or(KeySyncError::MissingPublicKey(item.user_id))?;
            let file = files
                .get(&item.file_id)
                .ok_or(KeySyncError::MissingFileKey(item.file_id))?;
            let plain = key_pair.decrypt_file_key(item.file_id, &file.file_key_container)?;
            let file_key = encrypt_file_key(&plain, &user.public_key_container)?;
            debug!(file_id = item.file_id, user_id = item.user_id, "Missing file key processed");
            processed.push(UserFileKeySetRequest {
                user_id: item.user_id,
                file_id: item.file_id,
                file_key,
            });
        }

        if !processed.is_empty() {
            self.api
                .set_user_file_keys(UserFileKeySetBatchRequest {
                    items: processed.clone(),
                })
                .await?;
            info!(count = processed.len(), "Submitted missing file keys");
        }
        Ok(processed)
    }

    /// Unlock the key pair with the stored passphrase, prompting until a
    /// passphrase fits.
    async fn unlock(&self, account: &UserAccount, container: &UserKeyPairContainer) -> Result<UserKeyPair, KeySyncError> {
        let account_key = format!("Encryption ({})", account.user_name);
        if let Some(saved) = self.passwords.get_password(&self.service, &account_key) {
            match UserKeyPair::unlock(container, saved.expose_secret()) {
                Ok(pair) => return Ok(pair),
                Err(e) => warn!(error = %e, "Stored passphrase rejected"),
            }
        }

        let reason = format!("Enter your encryption password for {}.", account.user_name);
        loop {
            let Some(credentials) = self.prompt.prompt(PROMPT_TITLE, &reason).await else {
                return Err(KeySyncError::LoginCanceled);
            };
            match UserKeyPair::unlock(container, credentials.passphrase.expose_secret()) {
                Ok(pair) => {
                    if credentials.save {
                        info!("Saving passphrase");
                        self.passwords
                            .add_password(&self.service, &account_key, &credentials.passphrase);
                    }
                    return Ok(pair);
                }
                Err(KeySyncError::Crypto(CryptoError::KeyUnwrapIntegrityFailed)) => {
                    debug!("Wrong passphrase, prompting again");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
