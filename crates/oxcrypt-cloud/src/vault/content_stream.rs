//! Streaming content encryption.
//!
//! Ciphertext is produced one chunk at a time from the cleartext, so a file
//! is never held in memory as a whole. [`encrypt_stream`] encrypts a
//! sequential stream for single-request writes. [`EncryptedSource`] serves any
//! byte range of the ciphertext for segmented uploads: chunk nonces depend
//! only on the chunk number, so a chunk straddling two segments is encrypted
//! to the same bytes in both.

use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::trace;
use zeroize::Zeroizing;

use super::content::{
    CHUNK_ENCRYPTED_SIZE, CHUNK_PLAINTEXT_SIZE, ChunkEncryptor, HEADER_SIZE, chunk_count,
    chunk_plaintext_len, ciphertext_size,
};
use crate::features::{ByteStream, byte_stream};
use crate::upload::UploadSource;

/// Fill `buf` from `reader`, stopping early only at end of stream.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Cleartext bytes consumed by an [`encrypt_stream`] so far.
#[derive(Debug, Clone, Default)]
pub struct EncryptionProgress(Arc<AtomicU64>);

impl EncryptionProgress {
    pub fn consumed(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn add(&self, bytes: usize) {
        self.0.fetch_add(bytes as u64, Ordering::AcqRel);
    }
}

/// Encrypt `length` bytes of `cleartext` as they are read.
///
/// The returned stream yields `ciphertext_size(length)` bytes. When the
/// cleartext ends early the stream ends after the last complete chunk, and
/// the progress handle reports how much was actually read.
pub fn encrypt_stream(
    cleartext: ByteStream,
    length: u64,
    encryptor: Arc<ChunkEncryptor>,
) -> (ByteStream, EncryptionProgress) {
    let progress = EncryptionProgress::default();
    let header = Bytes::copy_from_slice(encryptor.header());
    let chunks = chunk_count(length);

    let body = stream::try_unfold(
        (cleartext.take(length), 0u64, progress.clone()),
        move |(mut reader, chunk_number, progress)| {
            let encryptor = Arc::clone(&encryptor);
            async move {
                if chunk_number >= chunks {
                    return Ok::<_, io::Error>(None);
                }
                let mut plain = Zeroizing::new(vec![0u8; chunk_plaintext_len(chunk_number, length)]);
                let read = read_full(&mut reader, &mut plain).await?;
                progress.add(read);
                if read < plain.len() {
                    trace!(chunk = chunk_number, read, "Cleartext ended early");
                    return Ok(None);
                }
                let sealed = encryptor
                    .encrypt_chunk(chunk_number, &plain)
                    .map_err(io::Error::other)?;
                Ok(Some((Bytes::from(sealed), (reader, chunk_number + 1, progress))))
            }
        },
    );

    let ciphertext = stream::once(async move { Ok::<_, io::Error>(header) }).chain(body);
    (Box::pin(StreamReader::new(ciphertext)), progress)
}

/// The ciphertext of an [`UploadSource`], encrypted on demand.
pub struct EncryptedSource {
    cleartext: Arc<dyn UploadSource>,
    encryptor: Arc<ChunkEncryptor>,
}

impl EncryptedSource {
    pub fn new(cleartext: Arc<dyn UploadSource>, encryptor: Arc<ChunkEncryptor>) -> Self {
        Self {
            cleartext,
            encryptor,
        }
    }
}

#[async_trait]
impl UploadSource for EncryptedSource {
    fn len(&self) -> u64 {
        ciphertext_size(self.cleartext.len())
    }

    async fn open(&self, range: Range<u64>) -> io::Result<ByteStream> {
        let len = self.len();
        if range.start > range.end || range.end > len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("range {range:?} exceeds ciphertext length {len}"),
            ));
        }

        let header_len = HEADER_SIZE as u64;
        let header = self.encryptor.header();
        let head = if range.start < header_len {
            // both bounds are within the 68-byte header
            let end = range.end.min(header_len) as usize;
            Bytes::copy_from_slice(&header[range.start as usize..end])
        } else {
            Bytes::new()
        };
        if range.end <= header_len {
            return Ok(byte_stream(head));
        }

        let cleartext_len = self.cleartext.len();
        let body_start = range.start.max(header_len) - header_len;
        let body_end = range.end - header_len;
        let first = body_start / CHUNK_ENCRYPTED_SIZE as u64;
        let last = (body_end - 1) / CHUNK_ENCRYPTED_SIZE as u64;
        let clear_start = first * CHUNK_PLAINTEXT_SIZE as u64;
        let clear_end = ((last + 1) * CHUNK_PLAINTEXT_SIZE as u64).min(cleartext_len);
        let reader = self.cleartext.open(clear_start..clear_end).await?;

        let encryptor = Arc::clone(&self.encryptor);
        let body = stream::try_unfold((reader, first), move |(mut reader, chunk_number)| {
            let encryptor = Arc::clone(&encryptor);
            async move {
                if chunk_number > last {
                    return Ok::<_, io::Error>(None);
                }
                let mut plain = Zeroizing::new(vec![0u8; chunk_plaintext_len(chunk_number, cleartext_len)]);
                if read_full(&mut reader, &mut plain).await? < plain.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("cleartext ended inside chunk {chunk_number}"),
                    ));
                }
                let sealed = Bytes::from(
                    encryptor
                        .encrypt_chunk(chunk_number, &plain)
                        .map_err(io::Error::other)?,
                );

                let chunk_offset = chunk_number * CHUNK_ENCRYPTED_SIZE as u64;
                let sealed_len = sealed.len() as u64;
                let from = body_start.saturating_sub(chunk_offset).min(sealed_len);
                let to = (body_end - chunk_offset).min(sealed_len);
                // both offsets are bounded by the sealed chunk length
                let part = sealed.slice(from as usize..to as usize);
                Ok(Some((part, (reader, chunk_number + 1))))
            }
        });

        let ciphertext = stream::once(async move { Ok::<_, io::Error>(head) }).chain(body);
        Ok(Box::pin(StreamReader::new(ciphertext)))
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::crypto::MasterKey;
    use crate::vault::content::{FileContext, decrypt_content};

    fn key() -> MasterKey {
        MasterKey::new([5u8; 32], [6u8; 32]).unwrap()
    }

    fn payload(len: usize) -> Bytes {
        (0..len).map(|i| (i % 241) as u8).collect::<Vec<_>>().into()
    }

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    /// Records every cleartext range handed out.
    struct Recording {
        inner: Bytes,
        opened: Mutex<Vec<Range<u64>>>,
    }

    #[async_trait]
    impl UploadSource for Recording {
        fn len(&self) -> u64 {
            self.inner.len() as u64
        }

        async fn open(&self, range: Range<u64>) -> io::Result<ByteStream> {
            self.opened.lock().push(range.clone());
            self.inner.open(range).await
        }
    }

    #[tokio::test]
    async fn test_stream_decrypts() {
        let key = key();
        let data = payload(CHUNK_PLAINTEXT_SIZE * 2 + 17);
        let encryptor = Arc::new(ChunkEncryptor::new(&key).unwrap());
        let (stream, progress) = encrypt_stream(byte_stream(data.clone()), data.len() as u64, encryptor);

        let ciphertext = collect(stream).await;
        assert_eq!(ciphertext.len() as u64, ciphertext_size(data.len() as u64));
        assert_eq!(progress.consumed(), data.len() as u64);
        assert_eq!(decrypt_content(&ciphertext, &key, &FileContext::new()).unwrap(), data);
    }

    #[tokio::test]
    async fn test_stream_stops_on_short_cleartext() {
        let encryptor = Arc::new(ChunkEncryptor::new(&key()).unwrap());
        let (stream, progress) = encrypt_stream(byte_stream(&b"abc"[..]), 1 << 40, encryptor);

        let ciphertext = collect(stream).await;
        assert_eq!(ciphertext.len(), HEADER_SIZE);
        assert_eq!(progress.consumed(), 3);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let key = key();
        let encryptor = Arc::new(ChunkEncryptor::new(&key).unwrap());
        let (stream, _) = encrypt_stream(byte_stream(Bytes::new()), 0, encryptor);
        let ciphertext = collect(stream).await;
        assert_eq!(decrypt_content(&ciphertext, &key, &FileContext::new()).unwrap(), b"");
    }

    #[tokio::test]
    async fn test_ranges_assemble_to_whole() {
        let key = key();
        let data = payload(CHUNK_PLAINTEXT_SIZE * 3 + 500);
        let source = EncryptedSource::new(
            Arc::new(data.clone()),
            Arc::new(ChunkEncryptor::new(&key).unwrap()),
        );
        let len = UploadSource::len(&source);
        let whole = collect(source.open(0..len).await.unwrap()).await;
        assert_eq!(decrypt_content(&whole, &key, &FileContext::new()).unwrap(), data);

        // boundaries inside the header and inside chunks
        let cuts = [0, 10, 68, 20_000, 32_864, 50_000, 99_000, len];
        let mut assembled = Vec::new();
        for pair in cuts.windows(2) {
            assembled.extend(collect(source.open(pair[0]..pair[1]).await.unwrap()).await);
        }
        assert_eq!(assembled, whole);
        assert!(source.open(0..len + 1).await.is_err());
    }

    #[tokio::test]
    async fn test_ranges_read_only_covering_chunks() {
        let data = payload(CHUNK_PLAINTEXT_SIZE * 8);
        let recording = Arc::new(Recording {
            inner: data,
            opened: Mutex::new(Vec::new()),
        });
        let source = EncryptedSource::new(
            recording.clone(),
            Arc::new(ChunkEncryptor::new(&key()).unwrap()),
        );

        let start = (HEADER_SIZE + 3 * CHUNK_ENCRYPTED_SIZE + 100) as u64;
        let piece = collect(source.open(start..start + 1_000).await.unwrap()).await;
        assert_eq!(piece.len(), 1_000);

        let chunk = CHUNK_PLAINTEXT_SIZE as u64;
        assert_eq!(*recording.opened.lock(), vec![3 * chunk..4 * chunk]);
    }
}
