//! File content codec (AES-256-GCM, 32 KiB chunks).
//!
//! Layout of an encrypted object:
//! - **Header (68 bytes)**: 12-byte nonce + 40-byte encrypted payload + 16-byte tag
//! - **Chunks (up to 32,796 bytes each)**: 12-byte nonce + ciphertext + 16-byte tag
//!
//! Each chunk authenticates its chunk number and the header nonce as AAD, so
//! chunks cannot be reordered or moved between files. Range reads only need
//! the header and the chunks covering the range.

use std::fmt;
use std::ops::Range;

use aead::Payload;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};
use zeroize::Zeroizing;

use crate::crypto::{KeyAccessError, MasterKey};

pub const HEADER_SIZE: usize = 68;
pub const HEADER_NONCE_SIZE: usize = 12;
pub const CHUNK_NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const CHUNK_PLAINTEXT_SIZE: usize = 32 * 1024;
/// Overhead per chunk (nonce + tag).
pub const CHUNK_OVERHEAD: usize = CHUNK_NONCE_SIZE + TAG_SIZE;
pub const CHUNK_ENCRYPTED_SIZE: usize = CHUNK_PLAINTEXT_SIZE + CHUNK_OVERHEAD;

const HEADER_RESERVED: [u8; 8] = [0xFF; 8];

/// Context for content operations, carried by the content error types.
#[derive(Debug, Clone, Default)]
pub struct FileContext {
    pub filename: Option<String>,
    /// Ciphertext location in the backend
    pub encrypted_path: Option<String>,
    pub chunk_number: Option<u64>,
}

impl FileContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.encrypted_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk_number: u64) -> Self {
        self.chunk_number = Some(chunk_number);
        self
    }
}

impl fmt::Display for FileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref filename) = self.filename {
            parts.push(format!("file '{filename}'"));
        }
        if let Some(chunk) = self.chunk_number {
            parts.push(format!("chunk {chunk}"));
        }
        if let Some(ref path) = self.encrypted_path {
            parts.push(format!("at {path:?}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

#[derive(Error, Debug)]
pub enum ContentDecryptionError {
    #[error(
        "[INTEGRITY VIOLATION] Failed to decrypt header for {context}: invalid authentication tag - possible tampering or wrong key"
    )]
    HeaderDecryption { context: FileContext },

    #[error(
        "[INTEGRITY VIOLATION] Failed to decrypt content for {context}: invalid authentication tag - possible tampering or wrong key"
    )]
    ContentDecryption { context: FileContext },

    #[error("Invalid file header for {context}: {reason}")]
    InvalidHeader { reason: String, context: FileContext },

    #[error("Incomplete chunk for {context}: expected at least 28 bytes, got {actual_size}")]
    IncompleteChunk {
        context: FileContext,
        actual_size: usize,
    },

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

impl ContentDecryptionError {
    /// Replace the context carried by the error.
    #[must_use]
    pub fn with_context(self, context: FileContext) -> Self {
        match self {
            Self::HeaderDecryption { .. } => Self::HeaderDecryption { context },
            Self::ContentDecryption { .. } => Self::ContentDecryption { context },
            Self::InvalidHeader { reason, .. } => Self::InvalidHeader { reason, context },
            Self::IncompleteChunk { actual_size, .. } => Self::IncompleteChunk {
                context,
                actual_size,
            },
            Self::KeyAccess(e) => Self::KeyAccess(e),
        }
    }
}

#[derive(Error, Debug)]
pub enum ContentEncryptionError {
    #[error("Failed to encrypt header for {context}: {reason}")]
    HeaderEncryption { reason: String, context: FileContext },

    #[error("Failed to encrypt content for {context}: {reason}")]
    ContentEncryption { reason: String, context: FileContext },

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// Decrypted file header. The content key is zeroed on drop.
pub struct FileHeader {
    pub nonce: [u8; HEADER_NONCE_SIZE],
    pub content_key: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHeader")
            .field("nonce", &hex::encode(self.nonce))
            .field("content_key", &"[REDACTED]")
            .finish()
    }
}

impl FileHeader {
    /// A header with a fresh random nonce and content key.
    pub fn random() -> Self {
        let mut nonce = [0u8; HEADER_NONCE_SIZE];
        let mut content_key = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut nonce);
        rand::rng().fill_bytes(content_key.as_mut());
        FileHeader { nonce, content_key }
    }

    /// Encrypt the header under the vault's AES key.
    pub fn encrypt(&self, master_key: &MasterKey) -> Result<Vec<u8>, ContentEncryptionError> {
        master_key.with_aes_key(|aes_key| {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(aes_key));

            let mut plaintext = Zeroizing::new(Vec::with_capacity(40));
            plaintext.extend_from_slice(&HEADER_RESERVED);
            plaintext.extend_from_slice(self.content_key.as_ref());

            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&self.nonce), plaintext.as_slice())
                .map_err(|e| ContentEncryptionError::HeaderEncryption {
                    reason: e.to_string(),
                    context: FileContext::new(),
                })?;

            let mut encrypted = Vec::with_capacity(HEADER_SIZE);
            encrypted.extend_from_slice(&self.nonce);
            encrypted.extend_from_slice(&ciphertext);
            Ok(encrypted)
        })?
    }

    /// Decrypt a 68-byte header.
    #[instrument(level = "trace", skip_all, fields(header_size = encrypted.len()))]
    pub fn decrypt(
        encrypted: &[u8],
        master_key: &MasterKey,
        context: &FileContext,
    ) -> Result<Self, ContentDecryptionError> {
        if encrypted.len() != HEADER_SIZE {
            warn!(actual_size = encrypted.len(), "Invalid header size");
            return Err(ContentDecryptionError::InvalidHeader {
                reason: format!("expected {HEADER_SIZE} bytes, got {} bytes", encrypted.len()),
                context: context.clone(),
            });
        }

        let mut nonce = [0u8; HEADER_NONCE_SIZE];
        nonce.copy_from_slice(&encrypted[..HEADER_NONCE_SIZE]);

        master_key.with_aes_key(|aes_key| {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(aes_key));
            let decrypted = Zeroizing::new(
                cipher
                    .decrypt(Nonce::from_slice(&nonce), &encrypted[HEADER_NONCE_SIZE..])
                    .map_err(|_| {
                        warn!("Header decryption failed - authentication tag mismatch");
                        ContentDecryptionError::HeaderDecryption {
                            context: context.clone(),
                        }
                    })?,
            );

            // Reserved bytes are not validated, for forward compatibility
            if decrypted[..8] != HEADER_RESERVED {
                debug!(
                    reserved_bytes = %hex::encode(&decrypted[..8]),
                    "Header has non-standard reserved bytes"
                );
            }

            let mut content_key = Zeroizing::new([0u8; 32]);
            content_key.copy_from_slice(&decrypted[8..40]);
            Ok(FileHeader { nonce, content_key })
        })?
    }
}

fn chunk_aad(chunk_number: u64, header_nonce: &[u8; HEADER_NONCE_SIZE]) -> [u8; 20] {
    let mut aad = [0u8; 20];
    aad[..8].copy_from_slice(&chunk_number.to_be_bytes());
    aad[8..].copy_from_slice(header_nonce);
    aad
}

/// Number of chunks of a cleartext of `cleartext_len` bytes.
///
/// Empty content still has one (empty) authenticated chunk.
pub fn chunk_count(cleartext_len: u64) -> u64 {
    cleartext_len.div_ceil(CHUNK_PLAINTEXT_SIZE as u64).max(1)
}

/// Cleartext length of chunk `chunk_number` in a file of `cleartext_len` bytes.
pub fn chunk_plaintext_len(chunk_number: u64, cleartext_len: u64) -> usize {
    let remaining =
        cleartext_len.saturating_sub(chunk_number.saturating_mul(CHUNK_PLAINTEXT_SIZE as u64));
    usize::try_from(remaining).map_or(CHUNK_PLAINTEXT_SIZE, |r| r.min(CHUNK_PLAINTEXT_SIZE))
}

/// Encrypts the chunks of one file under a fresh content key.
///
/// The nonce of a chunk is a random per-file prefix followed by the chunk
/// number. Encrypting the same chunk twice yields the same bytes, so any
/// ciphertext range can be produced again independently of the others.
pub struct ChunkEncryptor {
    header: FileHeader,
    encrypted_header: Vec<u8>,
    cipher: Aes256Gcm,
    nonce_prefix: [u8; CHUNK_NONCE_SIZE - 8],
}

impl fmt::Debug for ChunkEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkEncryptor")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl ChunkEncryptor {
    pub fn new(master_key: &MasterKey) -> Result<Self, ContentEncryptionError> {
        let header = FileHeader::random();
        let encrypted_header = header.encrypt(master_key)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(header.content_key.as_ref()));
        let mut nonce_prefix = [0u8; CHUNK_NONCE_SIZE - 8];
        rand::rng().fill_bytes(&mut nonce_prefix);
        Ok(Self {
            header,
            encrypted_header,
            cipher,
            nonce_prefix,
        })
    }

    /// The encrypted 68-byte header.
    pub fn header(&self) -> &[u8] {
        &self.encrypted_header
    }

    fn chunk_nonce(&self, chunk_number: u64) -> [u8; CHUNK_NONCE_SIZE] {
        let mut nonce = [0u8; CHUNK_NONCE_SIZE];
        nonce[..self.nonce_prefix.len()].copy_from_slice(&self.nonce_prefix);
        nonce[self.nonce_prefix.len()..].copy_from_slice(&chunk_number.to_be_bytes());
        nonce
    }

    /// Seal one chunk: nonce, ciphertext and tag.
    pub fn encrypt_chunk(&self, chunk_number: u64, chunk: &[u8]) -> Result<Vec<u8>, ContentEncryptionError> {
        let nonce = self.chunk_nonce(chunk_number);
        let aad = chunk_aad(chunk_number, &self.header.nonce);
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: chunk,
                    aad: &aad,
                },
            )
            .map_err(|e| ContentEncryptionError::ContentEncryption {
                reason: e.to_string(),
                context: FileContext::new().with_chunk(chunk_number),
            })?;

        let mut out = Vec::with_capacity(CHUNK_NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

/// Encrypt `content` with a fresh content key: header followed by chunks.
#[instrument(level = "debug", skip_all, fields(size = content.len()))]
pub fn encrypt_content(
    content: &[u8],
    master_key: &MasterKey,
) -> Result<Vec<u8>, ContentEncryptionError> {
    let encryptor = ChunkEncryptor::new(master_key)?;
    let mut encrypted = Vec::with_capacity(HEADER_SIZE + content.len() + CHUNK_OVERHEAD);
    encrypted.extend_from_slice(encryptor.header());

    let chunks: Vec<&[u8]> = if content.is_empty() {
        vec![&[]]
    } else {
        content.chunks(CHUNK_PLAINTEXT_SIZE).collect()
    };
    for (chunk_number, chunk) in (0u64..).zip(chunks) {
        encrypted.extend_from_slice(&encryptor.encrypt_chunk(chunk_number, chunk)?);
    }

    trace!(encrypted_size = encrypted.len(), "Content encrypted");
    Ok(encrypted)
}

/// Decrypt consecutive chunks starting at `first_chunk`.
pub fn decrypt_chunks(
    encrypted_chunks: &[u8],
    first_chunk: u64,
    header: &FileHeader,
    context: &FileContext,
) -> Result<Vec<u8>, ContentDecryptionError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(header.content_key.as_ref()));
    let mut decrypted = Vec::with_capacity(encrypted_chunks.len());

    for (chunk_number, chunk) in (first_chunk..).zip(encrypted_chunks.chunks(CHUNK_ENCRYPTED_SIZE))
    {
        if chunk.len() < CHUNK_OVERHEAD {
            warn!(chunk = chunk_number, actual_size = chunk.len(), "Incomplete chunk");
            return Err(ContentDecryptionError::IncompleteChunk {
                context: context.clone().with_chunk(chunk_number),
                actual_size: chunk.len(),
            });
        }

        let aad = chunk_aad(chunk_number, &header.nonce);
        let plain = cipher
            .decrypt(
                Nonce::from_slice(&chunk[..CHUNK_NONCE_SIZE]),
                Payload {
                    msg: &chunk[CHUNK_NONCE_SIZE..],
                    aad: &aad,
                },
            )
            .map_err(|_| {
                warn!(chunk = chunk_number, "Chunk decryption failed - authentication tag mismatch");
                ContentDecryptionError::ContentDecryption {
                    context: context.clone().with_chunk(chunk_number),
                }
            })?;
        decrypted.extend_from_slice(&plain);
    }

    Ok(decrypted)
}

/// Decrypt a whole encrypted object (header and all chunks).
#[instrument(level = "debug", skip_all, fields(encrypted_size = encrypted.len()))]
pub fn decrypt_content(
    encrypted: &[u8],
    master_key: &MasterKey,
    context: &FileContext,
) -> Result<Vec<u8>, ContentDecryptionError> {
    if encrypted.len() < HEADER_SIZE + CHUNK_OVERHEAD {
        return Err(ContentDecryptionError::InvalidHeader {
            reason: format!("object too small: {} bytes", encrypted.len()),
            context: context.clone(),
        });
    }
    let header = FileHeader::decrypt(&encrypted[..HEADER_SIZE], master_key, context)?;
    decrypt_chunks(&encrypted[HEADER_SIZE..], 0, &header, context)
}

/// Cleartext size of an encrypted object of `encrypted_size` bytes.
///
/// `None` when the size cannot belong to a valid object.
pub fn cleartext_size(encrypted_size: u64) -> Option<u64> {
    let content = encrypted_size.checked_sub(HEADER_SIZE as u64)?;
    if content == 0 {
        return None;
    }
    let full_chunks = content / CHUNK_ENCRYPTED_SIZE as u64;
    let remainder = content % CHUNK_ENCRYPTED_SIZE as u64;

    let mut size = full_chunks * CHUNK_PLAINTEXT_SIZE as u64;
    if remainder > 0 {
        if remainder < CHUNK_OVERHEAD as u64 {
            return None;
        }
        size += remainder - CHUNK_OVERHEAD as u64;
    }
    Some(size)
}

/// Encrypted size of a cleartext of `cleartext_size` bytes.
pub fn ciphertext_size(cleartext_size: u64) -> u64 {
    (HEADER_SIZE as u64)
        .saturating_add(cleartext_size)
        .saturating_add(chunk_count(cleartext_size).saturating_mul(CHUNK_OVERHEAD as u64))
}

/// Chunks covering the cleartext `range`, clamped to `cleartext_len`.
///
/// Returns the first chunk number and the ciphertext byte range holding the
/// covering chunks, or `None` for an empty range.
pub fn covering_chunks(range: &Range<u64>, cleartext_len: u64) -> Option<(u64, Range<u64>)> {
    let end = range.end.min(cleartext_len);
    if range.start >= end {
        return None;
    }
    let chunk = CHUNK_PLAINTEXT_SIZE as u64;
    let first = range.start / chunk;
    let last = (end - 1) / chunk;
    let start_offset = HEADER_SIZE as u64 + first * CHUNK_ENCRYPTED_SIZE as u64;
    let end_offset =
        (HEADER_SIZE as u64 + (last + 1) * CHUNK_ENCRYPTED_SIZE as u64).min(ciphertext_size(cleartext_len));
    Some((first, start_offset..end_offset))
}

/// Encrypt a directory ID into its `dirid.c9r` backup.
pub fn encrypt_dir_id_backup(
    dir_id: &str,
    master_key: &MasterKey,
) -> Result<Vec<u8>, ContentEncryptionError> {
    encrypt_content(dir_id.as_bytes(), master_key)
}

/// Decrypt a `dirid.c9r` backup.
pub fn decrypt_dir_id_backup(
    encrypted: &[u8],
    master_key: &MasterKey,
) -> Result<String, ContentDecryptionError> {
    let context = FileContext::new().with_filename("dirid.c9r");
    let decrypted = decrypt_content(encrypted, master_key, &context)?;
    String::from_utf8(decrypted).map_err(|e| ContentDecryptionError::InvalidHeader {
        reason: format!("Directory ID is not valid UTF-8: {e}"),
        context,
    })
}
