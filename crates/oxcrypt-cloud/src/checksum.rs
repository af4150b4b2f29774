//! Transfer checksums.
//!
//! Backends report a SHA-256 digest for every committed object. Uploads hash
//! their payload while streaming it through [`ChecksumReader`] and compare the
//! result with the backend's reply.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

/// An `(algorithm, lowercase hex digest)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub hash: String,
}

impl Checksum {
    pub fn sha256(data: &[u8]) -> Self {
        Self::from_sha256_digest(&Sha256::digest(data))
    }

    fn from_sha256_digest(digest: &[u8]) -> Self {
        Checksum {
            algorithm: HashAlgorithm::Sha256,
            hash: hex::encode(digest),
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

/// Shared view on the running digest of a [`ChecksumReader`].
#[derive(Clone, Default)]
pub struct ChecksumHandle {
    hasher: Arc<Mutex<Sha256>>,
}

impl ChecksumHandle {
    /// Digest of everything read so far. Resets the running state.
    pub fn finalize(&self) -> Checksum {
        let hasher = std::mem::take(&mut *self.hasher.lock());
        Checksum::from_sha256_digest(&hasher.finalize())
    }
}

/// Hashes bytes as they are read from the wrapped stream.
pub struct ChecksumReader<R> {
    inner: R,
    handle: ChecksumHandle,
}

impl<R: AsyncRead + Unpin> ChecksumReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            handle: ChecksumHandle::default(),
        }
    }

    pub fn handle(&self) -> ChecksumHandle {
        self.handle.clone()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChecksumReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        self.handle.hasher.lock().update(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}
