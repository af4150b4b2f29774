//! Cryptographic primitives shared by the vault and the key-maintenance task

pub mod key_wrap;
pub mod keys;
mod thread_safety; // Send + Sync impls for MasterKey

use thiserror::Error;

/// Errors raised while deriving, wrapping or unwrapping key material.
///
/// Errors that point at tampering are labelled `[INTEGRITY VIOLATION]` and
/// should be treated as security events. The rest are wrong passphrases or
/// malformed parameters.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The `versionMac` of the master-key file did not verify.
    #[error("[INTEGRITY VIOLATION] HMAC verification failed - vault configuration tampered")]
    HmacVerificationFailed,

    /// The RFC 3394 integrity check failed during unwrapping.
    ///
    /// A wrong passphrase and a tampered master-key file are
    /// indistinguishable here; the former is far more common.
    #[error("Key unwrap failed - incorrect passphrase or corrupted/tampered key file")]
    KeyUnwrapIntegrityFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),

    #[error("Invalid ciphertext length for key unwrap")]
    InvalidCiphertextLength,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key wrap failed: {0}")]
    KeyWrap(#[from] key_wrap::WrapError),

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl From<key_wrap::UnwrapError> for CryptoError {
    fn from(err: key_wrap::UnwrapError) -> Self {
        match err {
            key_wrap::UnwrapError::InvalidCiphertextLength
            | key_wrap::UnwrapError::CiphertextTooShort => CryptoError::InvalidCiphertextLength,
            key_wrap::UnwrapError::InvalidIntegrityCheck => CryptoError::KeyUnwrapIntegrityFailed,
        }
    }
}

/// Derive a 256-bit key encryption key from a passphrase with scrypt (p = 1).
///
/// The passphrase is NFC-normalized first so that the same passphrase typed
/// on different platforms yields the same key.
pub fn derive_kek(
    passphrase: &str,
    salt: &[u8],
    log_n: u8,
    r: u32,
) -> Result<zeroize::Zeroizing<[u8; 32]>, CryptoError> {
    use unicode_normalization::UnicodeNormalization;

    let normalized = zeroize::Zeroizing::new(passphrase.nfc().collect::<String>());
    let params = scrypt::Params::new(log_n, r, 1, 32)
        .map_err(|e| CryptoError::InvalidScryptParams(e.to_string()))?;
    let mut kek = zeroize::Zeroizing::new([0u8; 32]);
    scrypt::scrypt(normalized.as_bytes(), salt, &params, kek.as_mut())
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(kek)
}

pub use keys::{KeyAccessError, MasterKey};
