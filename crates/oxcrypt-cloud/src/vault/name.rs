//! Filename and directory-ID codec (AES-SIV).
//!
//! Cleartext names are NFC-normalized and encrypted with the parent
//! directory's identifier as associated data, so the same name under two
//! directories produces unrelated ciphertexts and an entry cannot be swapped
//! between directories without detection.

use aes_siv::{KeyInit, siv::Aes256Siv};
use base64::{Engine as _, engine::general_purpose};
use data_encoding::BASE32;
use ring::digest;
use std::fmt;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::{KeyAccessError, MasterKey};

/// Suffix of regular (short) ciphertext entries.
pub const C9R_EXTENSION: &str = ".c9r";
/// Suffix of shortened (long name) ciphertext entries.
pub const C9S_EXTENSION: &str = ".c9s";

/// Context for filename operations, carried by [`NameError`].
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    pub encrypted_name: Option<String>,
    pub cleartext_name: Option<String>,
    /// Parent directory ID
    pub dir_id: Option<String>,
}

impl NameContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_encrypted_name(mut self, name: impl Into<String>) -> Self {
        self.encrypted_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_cleartext_name(mut self, name: impl Into<String>) -> Self {
        self.cleartext_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_dir_id(mut self, dir_id: impl Into<String>) -> Self {
        self.dir_id = Some(dir_id.into());
        self
    }
}

impl fmt::Display for NameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref name) = self.cleartext_name {
            parts.push(format!("filename '{name}'"));
        } else if let Some(ref enc_name) = self.encrypted_name {
            let display_name = match enc_name.char_indices().nth(37) {
                Some((idx, _)) if enc_name.len() > 40 => format!("{}...", &enc_name[..idx]),
                _ => enc_name.clone(),
            };
            parts.push(format!("encrypted name '{display_name}'"));
        }

        if let Some(ref dir_id) = self.dir_id {
            let display_id = if dir_id.is_empty() {
                "<root>".to_string()
            } else if dir_id.len() > 12 && dir_id.is_ascii() {
                format!("{}...", &dir_id[..12])
            } else {
                dir_id.clone()
            };
            parts.push(format!("in directory {display_id}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Errors from filename encryption and decryption.
///
/// AES-SIV is authenticated, so a decryption failure means the ciphertext was
/// altered, the key is wrong, or the entry was moved to another directory.
#[derive(Error, Debug)]
pub enum NameError {
    #[error(
        "[INTEGRITY VIOLATION] Failed to decrypt {context}: authentication failed - possible tampering, wrong key, or filename moved between directories"
    )]
    DecryptionFailed { context: NameContext },

    #[error("Invalid base64 encoding for {context}: {reason}")]
    Base64Decode { reason: String, context: NameContext },

    #[error("Invalid UTF-8 after decryption for {context}: {reason}")]
    Utf8Decode { reason: String, context: NameContext },

    #[error("Unexpected encryption failure for {context}")]
    EncryptionFailed { context: NameContext },

    #[error("Failed to hash directory ID '{dir_id}': encryption error")]
    DirIdHashFailed { dir_id: String },

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// Hash a directory ID into its 32-character BASE32 storage name.
///
/// The data directory lives at `d/{hash[..2]}/{hash[2..]}`.
pub fn hash_dir_id(dir_id: &str, master_key: &MasterKey) -> Result<String, NameError> {
    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let no_associated_data: &[&[u8]] = &[];
        let encrypted = cipher
            .encrypt(no_associated_data, dir_id.as_bytes())
            .map_err(|_| NameError::DirIdHashFailed {
                dir_id: dir_id.to_string(),
            })?;

        let hashed = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &encrypted);
        Ok(BASE32.encode(hashed.as_ref()))
    })?
}

/// Encrypt `name` under `parent_dir_id`.
///
/// Returns base64url (padded) without the `.c9r` suffix.
pub fn encrypt_filename(
    name: &str,
    parent_dir_id: &str,
    master_key: &MasterKey,
) -> Result<String, NameError> {
    let normalized: String = name.nfc().collect();

    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: &[&[u8]] = &[parent_dir_id.as_bytes()];
        let encrypted = cipher
            .encrypt(associated_data, normalized.as_bytes())
            .map_err(|_| NameError::EncryptionFailed {
                context: NameContext::new()
                    .with_cleartext_name(name)
                    .with_dir_id(parent_dir_id),
            })?;
        Ok(general_purpose::URL_SAFE.encode(&encrypted))
    })?
}

/// Decrypt a ciphertext name, with or without its `.c9r` suffix.
///
/// Padded base64url is tried first, then unpadded.
pub fn decrypt_filename(
    encrypted_name: &str,
    parent_dir_id: &str,
    master_key: &MasterKey,
) -> Result<String, NameError> {
    let context = || {
        NameContext::new()
            .with_encrypted_name(encrypted_name)
            .with_dir_id(parent_dir_id)
    };

    let encoded = encrypted_name
        .strip_suffix(C9R_EXTENSION)
        .unwrap_or(encrypted_name);
    let decoded = general_purpose::URL_SAFE
        .decode(encoded.as_bytes())
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(encoded.as_bytes()))
        .map_err(|e| NameError::Base64Decode {
            reason: e.to_string(),
            context: context(),
        })?;

    let decrypted = master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: &[&[u8]] = &[parent_dir_id.as_bytes()];
        cipher
            .decrypt(associated_data, &decoded)
            .map_err(|_| NameError::DecryptionFailed { context: context() })
    })??;

    String::from_utf8(decrypted).map_err(|e| NameError::Utf8Decode {
        reason: e.to_string(),
        context: context(),
    })
}

/// Token of a shortened entry: base64url(SHA1(full `.c9r` name)) + `.c9s`.
pub fn shortened_name(full_c9r_name: &str) -> String {
    let hash = digest::digest(
        &digest::SHA1_FOR_LEGACY_USE_ONLY,
        full_c9r_name.as_bytes(),
    );
    format!(
        "{}{C9S_EXTENSION}",
        general_purpose::URL_SAFE.encode(hash.as_ref())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_master_key() -> MasterKey {
        let mut aes_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        for i in 0..32u8 {
            aes_key[usize::from(i)] = i;
            mac_key[usize::from(i)] = 32 + i;
        }
        MasterKey::new(aes_key, mac_key).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let key = test_master_key();
        let encrypted = encrypt_filename("report.pdf", "parent-id", &key).unwrap();
        let with_suffix = format!("{encrypted}{C9R_EXTENSION}");
        assert_eq!(decrypt_filename(&encrypted, "parent-id", &key).unwrap(), "report.pdf");
        assert_eq!(decrypt_filename(&with_suffix, "parent-id", &key).unwrap(), "report.pdf");
    }

    #[test]
    fn test_deterministic_per_directory() {
        let key = test_master_key();
        let a = encrypt_filename("x", "dir-a", &key).unwrap();
        let b = encrypt_filename("x", "dir-a", &key).unwrap();
        let c = encrypt_filename("x", "dir-b", &key).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_wrong_directory_is_integrity_violation() {
        let key = test_master_key();
        let encrypted = encrypt_filename("x", "dir-a", &key).unwrap();
        let err = decrypt_filename(&encrypted, "dir-b", &key).unwrap_err();
        assert!(matches!(err, NameError::DecryptionFailed { .. }));
        assert!(err.to_string().contains("[INTEGRITY VIOLATION]"));
    }

    #[test]
    fn test_unpadded_input_accepted() {
        let key = test_master_key();
        let encrypted = encrypt_filename("a", "", &key).unwrap();
        let unpadded = encrypted.trim_end_matches('=');
        assert_eq!(decrypt_filename(unpadded, "", &key).unwrap(), "a");
    }

    #[test]
    fn test_invalid_base64() {
        let key = test_master_key();
        assert!(matches!(
            decrypt_filename("!!not base64!!.c9r", "", &key),
            Err(NameError::Base64Decode { .. })
        ));
    }

    #[test]
    fn test_nfc_normalization() {
        let key = test_master_key();
        let nfc = encrypt_filename("caf\u{e9}", "", &key).unwrap();
        let nfd = encrypt_filename("cafe\u{301}", "", &key).unwrap();
        assert_eq!(nfc, nfd);
    }

    #[test]
    fn test_hash_dir_id_shape() {
        let key = test_master_key();
        let root = hash_dir_id("", &key).unwrap();
        assert_eq!(root.len(), 32);
        assert!(root.chars().all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
        assert_ne!(root, hash_dir_id("some-id", &key).unwrap());
    }

    #[test]
    fn test_shortened_name() {
        let token = shortened_name("abc.c9r");
        assert!(token.ends_with(C9S_EXTENSION));
        // 20-byte digest -> 28 base64 chars with padding
        assert_eq!(token.len(), 28 + C9S_EXTENSION.len());
        assert_eq!(token, shortened_name("abc.c9r"));
    }

    #[test]
    fn test_context_display() {
        let ctx = NameContext::new().with_cleartext_name("f.txt").with_dir_id("");
        assert_eq!(ctx.to_string(), "filename 'f.txt' in directory <root>");
        assert_eq!(NameContext::new().to_string(), "(no context)");
    }

    proptest! {
        #[test]
        fn prop_name_roundtrip(name in "[^/\\x00]{1,64}", dir_id in "[a-f0-9-]{0,36}") {
            let key = test_master_key();
            let encrypted = encrypt_filename(&name, &dir_id, &key).unwrap();
            let decrypted = decrypt_filename(&encrypted, &dir_id, &key).unwrap();
            let normalized: String = name.nfc().collect();
            prop_assert_eq!(decrypted, normalized);
        }
    }
}
