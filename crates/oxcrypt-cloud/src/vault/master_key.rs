#![forbid(unsafe_code)]

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::{CryptoError, MasterKey, derive_kek, key_wrap};

/// scrypt parameters of new master-key files (N = 2^15, r = 8, p = 1).
pub const DEFAULT_SCRYPT_COST_LOG2: u8 = 15;
const DEFAULT_SCRYPT_SALT_LENGTH: usize = 8;
const DEFAULT_SCRYPT_BLOCK_SIZE: u32 = 8;

/// N = 2^10, selected by `OXCRYPT_FAST_KDF=1`. Testing only.
pub const FAST_SCRYPT_COST_LOG2: u8 = 10;

/// Legacy version field, fixed at 999 since vault format 8.
const MASTERKEY_FILE_VERSION: u32 = 999;

fn is_fast_kdf_enabled() -> bool {
    std::env::var("OXCRYPT_FAST_KDF")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// scrypt cost used when the caller does not pick one.
pub fn default_scrypt_cost_log2() -> u8 {
    if is_fast_kdf_enabled() {
        FAST_SCRYPT_COST_LOG2
    } else {
        DEFAULT_SCRYPT_COST_LOG2
    }
}

#[derive(Error, Debug)]
pub enum MasterKeyCreationError {
    #[error("RNG failed: {0}")]
    Rng(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key wrap failed: {0}")]
    KeyWrap(#[from] key_wrap::WrapError),

    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<crate::crypto::KeyAccessError> for MasterKeyCreationError {
    fn from(err: crate::crypto::KeyAccessError) -> Self {
        MasterKeyCreationError::Crypto(CryptoError::KeyAccess(err))
    }
}

/// Content of `masterkey.cryptomator`.
///
/// Both master keys are RFC 3394-wrapped under a KEK derived from the
/// passphrase with scrypt.
#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyFile {
    version: u32,

    #[serde_as(as = "Base64")]
    pub scrypt_salt: Vec<u8>,

    /// scrypt N, a power of two.
    pub scrypt_cost_param: i32,

    pub scrypt_block_size: i32,

    /// Wrapped AES master key.
    #[serde_as(as = "Base64")]
    pub primary_master_key: Vec<u8>,

    /// Wrapped MAC master key.
    #[serde_as(as = "Base64")]
    pub hmac_master_key: Vec<u8>,

    /// HMAC-SHA256 over the big-endian version.
    #[serde_as(as = "Base64")]
    pub version_mac: Vec<u8>,
}

impl MasterKeyFile {
    fn scrypt_params(&self) -> Result<(u8, u32), CryptoError> {
        let n = self.scrypt_cost_param;
        if n <= 1 || n.count_ones() != 1 {
            return Err(CryptoError::InvalidScryptParams(format!(
                "cost parameter {n} is not a power of two"
            )));
        }
        let r = u32::try_from(self.scrypt_block_size).map_err(|_| {
            CryptoError::InvalidScryptParams(format!(
                "block size {} is negative",
                self.scrypt_block_size
            ))
        })?;
        // n > 1 and a power of two, so trailing_zeros < 31
        #[allow(clippy::cast_possible_truncation)]
        Ok((n.trailing_zeros() as u8, r))
    }

    /// Unwrap the master keys with `passphrase`.
    ///
    /// A wrong passphrase fails with [`CryptoError::KeyUnwrapIntegrityFailed`];
    /// a tampered version field with [`CryptoError::HmacVerificationFailed`].
    pub fn unlock(&self, passphrase: &str) -> Result<MasterKey, CryptoError> {
        let (log_n, r) = self.scrypt_params()?;
        let kek = derive_kek(passphrase, &self.scrypt_salt, log_n, r)?;

        let mut aes_key = unwrap_32(&self.primary_master_key, &kek)?;
        let mut mac_key = unwrap_32(&self.hmac_master_key, &kek)?;

        let verified = self.check_vault_version(&mac_key);
        let key = verified.and_then(|()| MasterKey::new(aes_key, mac_key).map_err(Into::into));
        aes_key.zeroize();
        mac_key.zeroize();
        key
    }

    fn check_vault_version(&self, mac_key: &[u8; 32]) -> Result<(), CryptoError> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, mac_key);
        hmac::verify(&key, &self.version.to_be_bytes(), &self.version_mac)
            .map_err(|_| CryptoError::HmacVerificationFailed)
    }
}

fn unwrap_32(wrapped: &[u8], kek: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let key = zeroize::Zeroizing::new(key_wrap::unwrap_key(wrapped, kek)?);
    key.as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: key.len(),
        })
}

/// Serialize `master_key` into a new `masterkey.cryptomator` document.
///
/// A fresh 8-byte salt is drawn for every call.
pub fn create_masterkey_file(
    master_key: &MasterKey,
    passphrase: &str,
    scrypt_cost_log2: u8,
) -> Result<String, MasterKeyCreationError> {
    let mut salt = vec![0u8; DEFAULT_SCRYPT_SALT_LENGTH];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| MasterKeyCreationError::Rng("Failed to generate salt".to_string()))?;

    let kek = derive_kek(
        passphrase,
        &salt,
        scrypt_cost_log2,
        DEFAULT_SCRYPT_BLOCK_SIZE,
    )?;

    // AES key first, then MAC key
    let wrapped_aes = master_key.with_aes_key(|key| key_wrap::wrap_key(key, &kek))??;
    let wrapped_mac = master_key.with_mac_key(|key| key_wrap::wrap_key(key, &kek))??;

    let version_mac = master_key.with_mac_key(|key| {
        let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, key);
        hmac::sign(&hmac_key, &MASTERKEY_FILE_VERSION.to_be_bytes())
            .as_ref()
            .to_vec()
    })?;

    let file = MasterKeyFile {
        version: MASTERKEY_FILE_VERSION,
        scrypt_salt: salt,
        scrypt_cost_param: 1i32 << scrypt_cost_log2,
        #[allow(clippy::cast_possible_wrap)]
        scrypt_block_size: DEFAULT_SCRYPT_BLOCK_SIZE as i32,
        primary_master_key: wrapped_aes,
        hmac_master_key: wrapped_mac,
        version_mac,
    };

    Ok(serde_json::to_string_pretty(&file)?)
}
