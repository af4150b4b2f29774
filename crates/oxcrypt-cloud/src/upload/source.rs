use std::io;
use std::ops::Range;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::checksum::{Checksum, ChecksumReader};
use crate::features::{ByteStream, byte_stream};

/// Random-access payload of an upload.
///
/// Segments are read independently and concurrently, so a source hands out
/// a fresh stream per byte range instead of one shared reader.
#[async_trait]
pub trait UploadSource: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream over `range`, which lies within `0..len()`.
    async fn open(&self, range: Range<u64>) -> io::Result<ByteStream>;

    /// SHA-256 of the bytes in `range`.
    async fn checksum(&self, range: Range<u64>) -> io::Result<Checksum> {
        let mut reader = ChecksumReader::new(self.open(range).await?);
        let handle = reader.handle();
        tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
        Ok(handle.finalize())
    }
}

fn out_of_bounds(range: &Range<u64>, len: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("range {range:?} exceeds source length {len}"),
    )
}

#[async_trait]
impl UploadSource for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    async fn open(&self, range: Range<u64>) -> io::Result<ByteStream> {
        let len = UploadSource::len(self);
        if range.start > range.end || range.end > len {
            return Err(out_of_bounds(&range, len));
        }
        let (Ok(start), Ok(end)) = (usize::try_from(range.start), usize::try_from(range.end)) else {
            return Err(out_of_bounds(&range, len));
        };
        Ok(byte_stream(self.slice(start..end)))
    }
}

/// A local file read with positioned streams.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(Self { path, len })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn open(&self, range: Range<u64>) -> io::Result<ByteStream> {
        if range.start > range.end || range.end > self.len {
            return Err(out_of_bounds(&range, self.len));
        }
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(range.start)).await?;
        Ok(Box::pin(file.take(range.end - range.start)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stream = stream;
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_bytes_ranges() {
        let source = Bytes::from_static(b"0123456789");
        assert_eq!(collect(source.open(2..5).await.unwrap()).await, b"234");
        assert!(source.open(5..11).await.is_err());
        assert_eq!(
            source.checksum(0..10).await.unwrap(),
            Checksum::sha256(b"0123456789")
        );
    }

    #[tokio::test]
    async fn test_file_ranges() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("payload");
        std::fs::write(&path, b"abcdefghij").unwrap();

        let source = FileSource::new(&path).await.unwrap();
        assert_eq!(UploadSource::len(&source), 10);
        assert_eq!(collect(source.open(7..10).await.unwrap()).await, b"hij");
        assert_eq!(source.checksum(0..3).await.unwrap(), Checksum::sha256(b"abc"));
    }
}
