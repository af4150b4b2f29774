#![forbid(unsafe_code)]

//! User key pairs and file-key wrapping.
//!
//! A file key is wrapped for a recipient with RFC 3394 under a KEK derived
//! by HKDF-SHA256 from an X25519 agreement between a fresh ephemeral key and
//! the recipient's public key. The ephemeral public key travels with the
//! wrapped key.

use rand::RngCore;
use ring::hkdf;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::KeySyncError;
use super::api::{FileKeyContainer, PrivateKeyContainer, PublicKeyContainer, UserKeyPairContainer};
use crate::crypto::{derive_kek, key_wrap};

pub const KEY_PAIR_VERSION: &str = "X25519";
pub const FILE_KEY_VERSION: &str = "X25519-HKDF-SHA256-AESKW";

const HKDF_INFO: &[u8] = b"oxcrypt file key";
const SCRYPT_BLOCK_SIZE: u32 = 8;
const SALT_LENGTH: usize = 16;

/// A cleartext 256-bit file key.
pub struct PlainFileKey(Zeroizing<[u8; 32]>);

impl PlainFileKey {
    pub fn random() -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(key.as_mut());
        Self(key)
    }

    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self(Zeroizing::new(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for PlainFileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlainFileKey([REDACTED])")
    }
}

/// An unlocked X25519 key pair.
pub struct UserKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for UserKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

fn random_secret() -> StaticSecret {
    let mut bytes = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(bytes.as_mut());
    StaticSecret::from(*bytes)
}

fn public_key(container: &PublicKeyContainer) -> Result<PublicKey, KeySyncError> {
    let bytes: [u8; 32] = container
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| KeySyncError::InvalidKeyPair(format!("public key has {} bytes", container.public_key.len())))?;
    Ok(PublicKey::from(bytes))
}

fn file_key_kek(
    shared: &[u8; 32],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>, KeySyncError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &salt).extract(shared);
    let mut kek = Zeroizing::new([0u8; 32]);
    prk.expand(&[HKDF_INFO], hkdf::HKDF_SHA256)
        .and_then(|okm| okm.fill(kek.as_mut()))
        .map_err(|_| KeySyncError::InvalidKeyPair("HKDF expansion failed".to_string()))?;
    Ok(kek)
}

impl UserKeyPair {
    pub fn generate() -> Self {
        let secret = random_secret();
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_container(&self) -> PublicKeyContainer {
        PublicKeyContainer {
            version: KEY_PAIR_VERSION.to_string(),
            public_key: self.public.as_bytes().to_vec(),
        }
    }

    /// Wrap the private key under a passphrase for storage at the service.
    pub fn to_container(&self, passphrase: &str, scrypt_cost_log2: u8) -> Result<UserKeyPairContainer, KeySyncError> {
        let mut salt = vec![0u8; SALT_LENGTH];
        rand::rng().fill_bytes(&mut salt);
        let kek = derive_kek(passphrase, &salt, scrypt_cost_log2, SCRYPT_BLOCK_SIZE)?;
        let secret = Zeroizing::new(self.secret.to_bytes());
        let wrapped = key_wrap::wrap_key(secret.as_ref(), &kek).map_err(crate::crypto::CryptoError::from)?;
        Ok(UserKeyPairContainer {
            private_key_container: PrivateKeyContainer {
                version: KEY_PAIR_VERSION.to_string(),
                private_key: wrapped,
                salt,
                scrypt_cost_log2,
            },
            public_key_container: self.public_key_container(),
        })
    }

    /// Unwrap the private key of `container` with `passphrase`.
    ///
    /// A wrong passphrase fails the key-wrap integrity check. The unwrapped
    /// secret must also match the listed public key.
    pub fn unlock(container: &UserKeyPairContainer, passphrase: &str) -> Result<Self, KeySyncError> {
        let private = &container.private_key_container;
        if private.version != KEY_PAIR_VERSION {
            return Err(KeySyncError::InvalidKeyPair(format!("unsupported version {}", private.version)));
        }
        let kek = derive_kek(passphrase, &private.salt, private.scrypt_cost_log2, SCRYPT_BLOCK_SIZE)?;
        let unwrapped = Zeroizing::new(
            key_wrap::unwrap_key(&private.private_key, &kek).map_err(crate::crypto::CryptoError::from)?,
        );
        let bytes: [u8; 32] = unwrapped
            .as_slice()
            .try_into()
            .map_err(|_| KeySyncError::InvalidKeyPair(format!("private key has {} bytes", unwrapped.len())))?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        if public != public_key(&container.public_key_container)? {
            return Err(KeySyncError::InvalidKeyPair(
                "private key does not match public key".to_string(),
            ));
        }
        Ok(Self { secret, public })
    }

    /// Unwrap a file key addressed to this key pair.
    pub fn decrypt_file_key(&self, file_id: u64, container: &FileKeyContainer) -> Result<PlainFileKey, KeySyncError> {
        let invalid = |reason: String| KeySyncError::InvalidFileKey { file_id, reason };
        if container.version != FILE_KEY_VERSION {
            return Err(invalid(format!("unsupported version {}", container.version)));
        }
        let ephemeral: [u8; 32] = container
            .ephemeral_public_key
            .as_slice()
            .try_into()
            .map_err(|_| invalid("malformed ephemeral key".to_string()))?;
        let ephemeral = PublicKey::from(ephemeral);
        let shared = self.secret.diffie_hellman(&ephemeral);
        let kek = file_key_kek(shared.as_bytes(), &ephemeral, &self.public)?;
        let unwrapped = Zeroizing::new(
            key_wrap::unwrap_key(&container.key, &kek).map_err(|e| invalid(e.to_string()))?,
        );
        let key: [u8; 32] = unwrapped
            .as_slice()
            .try_into()
            .map_err(|_| invalid(format!("file key has {} bytes", unwrapped.len())))?;
        Ok(PlainFileKey::from_bytes(key))
    }
}

/// Wrap `file_key` for the owner of `recipient`.
pub fn encrypt_file_key(file_key: &PlainFileKey, recipient: &PublicKeyContainer) -> Result<FileKeyContainer, KeySyncError> {
    let recipient = public_key(recipient)?;
    let ephemeral_secret = random_secret();
    let ephemeral = PublicKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(&recipient);
    let kek = file_key_kek(shared.as_bytes(), &ephemeral, &recipient)?;
    let key = key_wrap::wrap_key(file_key.as_bytes(), &kek).map_err(crate::crypto::CryptoError::from)?;
    Ok(FileKeyContainer {
        version: FILE_KEY_VERSION.to_string(),
        key,
        ephemeral_public_key: ephemeral.as_bytes().to_vec(),
    })
}

/// Whether `passphrase` unlocks `container`.
pub fn check_user_key_pair(container: &UserKeyPairContainer, passphrase: &str) -> bool {
    UserKeyPair::unlock(container, passphrase).is_ok()
}
