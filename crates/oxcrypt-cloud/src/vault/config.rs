#![forbid(unsafe_code)]

use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{KeyAccessError, MasterKey, keys::JwtValidationError};
use crate::vault::master_key::default_scrypt_cost_log2;

/// Encrypted names longer than this are shortened to a `.c9s` token.
pub const DEFAULT_SHORTENING_THRESHOLD: usize = 220;

/// Vault format written and accepted by this crate.
pub const VAULT_FORMAT: i32 = 8;

pub const CIPHER_COMBO_SIV_GCM: &str = "SIV_GCM";

/// `kid` header pointing at the master-key file next to the config.
pub const MASTERKEY_KID: &str = "masterkeyfile:masterkey.cryptomator";

pub const VAULT_CONFIG_FILE: &str = "vault.cryptomator";
pub const MASTERKEY_FILE: &str = "masterkey.cryptomator";

/// Options used when creating a vault.
///
/// # Example
///
/// ```
/// use oxcrypt_cloud::VaultOptions;
///
/// let options = VaultOptions::default()
///     .shortening_threshold(120)
///     .scrypt_cost_log2(10);
/// assert_eq!(options.shortening_threshold, 120);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultOptions {
    pub shortening_threshold: usize,
    /// log2 of the scrypt cost N. `None` means 15, or 10 with
    /// `OXCRYPT_FAST_KDF=1`.
    pub scrypt_cost_log2: Option<u8>,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            shortening_threshold: DEFAULT_SHORTENING_THRESHOLD,
            scrypt_cost_log2: None,
        }
    }
}

impl VaultOptions {
    #[must_use]
    pub fn shortening_threshold(mut self, threshold: usize) -> Self {
        self.shortening_threshold = threshold;
        self
    }

    #[must_use]
    pub fn scrypt_cost_log2(mut self, log2: u8) -> Self {
        self.scrypt_cost_log2 = Some(log2);
        self
    }

    pub(crate) fn effective_scrypt_cost(&self) -> u8 {
        self.scrypt_cost_log2.unwrap_or_else(default_scrypt_cost_log2)
    }
}

/// Claims of `vault.cryptomator`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfigurationClaims {
    pub format: i32,
    #[serde(default = "default_shortening_threshold")]
    pub shortening_threshold: i32,
    pub jti: String,
    pub cipher_combo: String,
}

fn default_shortening_threshold() -> i32 {
    220
}

impl VaultConfigurationClaims {
    pub fn new(vault_id: impl Into<String>, shortening_threshold: usize) -> Self {
        Self {
            format: VAULT_FORMAT,
            shortening_threshold: i32::try_from(shortening_threshold).unwrap_or(i32::MAX),
            jti: vault_id.into(),
            cipher_combo: CIPHER_COMBO_SIV_GCM.to_string(),
        }
    }

    pub fn shortening_threshold(&self) -> usize {
        usize::try_from(self.shortening_threshold.max(0)).unwrap_or(DEFAULT_SHORTENING_THRESHOLD)
    }
}

#[derive(Error, Debug)]
pub enum ClaimValidationError {
    #[error("JWT decode error: {0}")]
    JwtDecode(#[from] jsonwebtoken::errors::Error),

    #[error("JWT validation error: {0}")]
    JwtValidation(#[from] JwtValidationError),

    #[error("Missing or unsupported kid in vault config header: {0:?}")]
    UnsupportedKid(Option<String>),

    #[error("Unsupported cipher combo: {0}")]
    UnsupportedCipherCombo(String),

    #[error("Unsupported vault format: {0}")]
    UnsupportedVaultFormat(i32),
}

/// Name of the master-key file referenced by the config header's `kid`.
pub fn masterkey_file_name(vault_config: &str) -> Result<String, ClaimValidationError> {
    let header = jsonwebtoken::decode_header(vault_config)?;
    let kid = header.kid.clone();
    let uri = header
        .kid
        .as_deref()
        .and_then(|kid| url::Url::parse(kid).ok())
        .filter(|uri| uri.scheme() == "masterkeyfile")
        .ok_or(ClaimValidationError::UnsupportedKid(kid))?;
    Ok(uri.path().trim_start_matches('/').to_string())
}

/// Verify the config signature with `master_key` and check format and
/// cipher combo.
pub fn validate_vault_claims(
    vault_config: &str,
    master_key: &MasterKey,
) -> Result<VaultConfigurationClaims, ClaimValidationError> {
    let header = jsonwebtoken::decode_header(vault_config)?;

    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

    let claims = master_key.validate_jwt::<VaultConfigurationClaims>(vault_config, &validation)?;

    if claims.cipher_combo != CIPHER_COMBO_SIV_GCM {
        return Err(ClaimValidationError::UnsupportedCipherCombo(
            claims.cipher_combo,
        ));
    }
    if claims.format != VAULT_FORMAT {
        return Err(ClaimValidationError::UnsupportedVaultFormat(claims.format));
    }

    Ok(claims)
}

#[derive(Error, Debug)]
pub enum VaultConfigCreationError {
    #[error("JWT encoding error: {0}")]
    JwtEncode(#[from] jsonwebtoken::errors::Error),

    #[error("Key access error: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// Sign `claims` into a `vault.cryptomator` token.
pub fn create_vault_config(
    claims: &VaultConfigurationClaims,
    master_key: &MasterKey,
) -> Result<String, VaultConfigCreationError> {
    let encoding_key = master_key.create_jwt_encoding_key()?;
    let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
    header.kid = Some(MASTERKEY_KID.to_string());
    Ok(jsonwebtoken::encode(&header, claims, &encoding_key)?)
}
