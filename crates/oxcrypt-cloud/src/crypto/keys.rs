#![forbid(unsafe_code)]

use std::sync::RwLock;

use generic_array::{GenericArray, typenum::U64};
use memsafe::MemSafe;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

/// Error type for key access operations.
///
/// Raised when protected key material cannot be read, either because the
/// memory protection syscalls failed or because a thread panicked while
/// holding the key lock.
#[derive(Debug, Error)]
pub enum KeyAccessError {
    /// Memory protection operation failed (mlock, mprotect, etc.)
    #[error("Memory protection operation failed: {0}")]
    MemoryProtection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Lock was poisoned (a thread panicked while holding it)
    #[error("Key lock was poisoned")]
    LockPoisoned,
}

impl KeyAccessError {
    pub fn memory_protection<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        KeyAccessError::MemoryProtection(Box::new(err))
    }
}

/// Error type for JWT validation against the vault master key.
#[derive(Debug, Error)]
pub enum JwtValidationError {
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),

    #[error("JWT validation failed: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

/// Master key pair of a vault: a 256-bit content key and a 256-bit MAC key.
///
/// Both halves live in `MemSafe` containers (mlocked, `PROT_NONE` while idle,
/// zeroed on drop). Key bytes are only reachable through the scoped `with_*`
/// accessors, which elevate memory permissions for the duration of the
/// callback.
///
/// A vault holds its key behind an `Arc<MasterKey>`; locking the vault drops
/// the last reference, which zeroizes the material.
#[derive(Debug)]
pub struct MasterKey {
    aes_master_key: RwLock<MemSafe<[u8; 32]>>,
    mac_master_key: RwLock<MemSafe<[u8; 32]>>,
}

impl MasterKey {
    /// Generate a new random master key pair.
    pub fn random() -> Result<Self, KeyAccessError> {
        let mut aes_master_key = [0u8; 32];
        let mut mac_master_key = [0u8; 32];
        rand::rng().fill_bytes(&mut aes_master_key);
        rand::rng().fill_bytes(&mut mac_master_key);
        let key = Self::new(aes_master_key, mac_master_key);
        aes_master_key.zeroize();
        mac_master_key.zeroize();
        key
    }

    /// Create a master key pair from raw key material.
    ///
    /// The arrays are copied into protected storage; zeroing the originals is
    /// the caller's responsibility.
    pub fn new(aes_key: [u8; 32], mac_key: [u8; 32]) -> Result<Self, KeyAccessError> {
        Ok(MasterKey {
            aes_master_key: RwLock::new(
                MemSafe::new(aes_key).map_err(KeyAccessError::memory_protection)?,
            ),
            mac_master_key: RwLock::new(
                MemSafe::new(mac_key).map_err(KeyAccessError::memory_protection)?,
            ),
        })
    }

    fn read_half(
        half: &RwLock<MemSafe<[u8; 32]>>,
        out: &mut [u8],
    ) -> Result<(), KeyAccessError> {
        let mut lock = half.write().map_err(|_| KeyAccessError::LockPoisoned)?;
        let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
        out.copy_from_slice(&*guard);
        Ok(())
    }

    /// Run `f` with the combined 512-bit key (AES key || MAC key).
    ///
    /// The temporary copy is zeroed when the callback returns.
    pub fn with_raw_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8]) -> R,
    {
        struct ZeroOnDrop([u8; 64]);
        impl Drop for ZeroOnDrop {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        let mut key = ZeroOnDrop([0u8; 64]);
        Self::read_half(&self.aes_master_key, &mut key.0[..32])?;
        Self::read_half(&self.mac_master_key, &mut key.0[32..])?;
        Ok(f(&key.0))
    }

    /// Run `f` with the 256-bit content encryption key.
    pub fn with_aes_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        let mut lock = self
            .aes_master_key
            .write()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
        Ok(f(&guard))
    }

    /// Run `f` with the 256-bit MAC key.
    pub fn with_mac_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        let mut lock = self
            .mac_master_key
            .write()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
        Ok(f(&guard))
    }

    /// Run `f` with both keys in AES-SIV order (MAC key || AES key).
    pub fn with_siv_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&GenericArray<u8, U64>) -> R,
    {
        // GenericArray doesn't implement DefaultIsZeroes
        struct ZeroizeOnDrop(GenericArray<u8, U64>);

        impl Drop for ZeroizeOnDrop {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        let mut key = ZeroizeOnDrop(GenericArray::<u8, U64>::default());
        // SIV takes the MAC key first
        Self::read_half(&self.mac_master_key, &mut key.0[..32])?;
        Self::read_half(&self.aes_master_key, &mut key.0[32..])?;
        Ok(f(&key.0))
    }

    /// Create a JWT encoding key from the combined key material.
    ///
    /// `jsonwebtoken` keeps its own copy of the secret and does not zeroize
    /// it, so the returned key should be used and dropped immediately.
    pub fn create_jwt_encoding_key(&self) -> Result<jsonwebtoken::EncodingKey, KeyAccessError> {
        self.with_raw_key(jsonwebtoken::EncodingKey::from_secret)
    }

    /// Validate and decode a JWT signed with this master key.
    pub fn validate_jwt<T>(
        &self,
        token: &str,
        validation: &jsonwebtoken::Validation,
    ) -> Result<T, JwtValidationError>
    where
        T: serde::de::DeserializeOwned,
    {
        let jwt_result = self.with_raw_key(|key_bytes| {
            let decoding_key = jsonwebtoken::DecodingKey::from_secret(key_bytes);
            jsonwebtoken::decode::<T>(token, &decoding_key, validation)
                .map(|token_data| token_data.claims)
        })?;
        jwt_result.map_err(JwtValidationError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_access() {
        let master_key = MasterKey::random().unwrap();
        let result = master_key.with_raw_key(<[u8]>::len).unwrap();
        assert_eq!(result, 64);
    }

    #[test]
    fn test_key_ordering() {
        let master_key = MasterKey::new([1u8; 32], [2u8; 32]).unwrap();

        master_key
            .with_raw_key(|key| {
                assert_eq!(&key[..32], &[1u8; 32]);
                assert_eq!(&key[32..], &[2u8; 32]);
            })
            .unwrap();

        master_key
            .with_siv_key(|key| {
                assert_eq!(&key[..32], &[2u8; 32]);
                assert_eq!(&key[32..], &[1u8; 32]);
            })
            .unwrap();
    }

    #[test]
    fn test_random_keys_differ() {
        let a = MasterKey::random().unwrap();
        let b = MasterKey::random().unwrap();
        let a_bytes = a.with_raw_key(<[u8]>::to_vec).unwrap();
        let b_bytes = b.with_raw_key(<[u8]>::to_vec).unwrap();
        assert_ne!(a_bytes, b_bytes);
    }
}
