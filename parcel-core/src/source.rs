//! Range-scoped access to the bytes being uploaded

use bytes::Bytes;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A source that serves independent reads at arbitrary offsets.
///
/// Implementations must not share a cursor between reads: several
/// workers read different ranges at the same time, and a retried part
/// reads its range again.
pub trait ByteSource: Send + Sync {
    /// Total size in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `length` bytes starting at `offset`
    fn read_range(&self, offset: u64, length: u64)
        -> impl Future<Output = io::Result<Bytes>> + Send;
}

/// A local file, reopened for every range read
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a regular file", path.display()),
            ));
        }
        Ok(FileSource {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, offset: u64, length: u64) -> io::Result<Bytes> {
        let length = usize::try_from(length)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "range too large"))?;

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "'{}' is shorter than planned: could not read {} bytes at offset {}",
                        self.path.display(),
                        length,
                        offset
                    ),
                )
            } else {
                e
            }
        })?;

        Ok(Bytes::from(buf))
    }
}

/// An in-memory buffer
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        MemorySource { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, length: u64) -> io::Result<Bytes> {
        let start = usize::try_from(offset).ok();
        let end = offset
            .checked_add(length)
            .and_then(|end| usize::try_from(end).ok());

        match (start, end) {
            (Some(start), Some(end)) if end <= self.data.len() => Ok(self.data.slice(start..end)),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}+{} is outside a {} byte buffer",
                    offset,
                    length,
                    self.data.len()
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_source_independent_reads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.len(), 1000);

        // Out-of-order and repeated reads return the same bytes
        let tail = source.read_range(900, 100).await.unwrap();
        let head = source.read_range(0, 100).await.unwrap();
        let tail_again = source.read_range(900, 100).await.unwrap();

        assert_eq!(&head[..], &data[..100]);
        assert_eq!(&tail[..], &data[900..]);
        assert_eq!(tail, tail_again);
    }

    #[tokio::test]
    async fn test_file_source_short_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"short").unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).await.unwrap();
        let err = source.read_range(2, 10).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_file_source_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSource::open(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_source_bounds() {
        let source = MemorySource::new(&b"hello world"[..]);
        assert_eq!(&source.read_range(6, 5).await.unwrap()[..], b"world");
        assert!(source.read_range(6, 6).await.is_err());
        assert!(source.read_range(u64::MAX, 1).await.is_err());
    }
}
