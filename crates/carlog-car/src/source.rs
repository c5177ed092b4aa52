use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{CarError, CarResult};

/// Random-access, read-only view of an archive.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Read up to `length` bytes starting at `position`.
    ///
    /// Fewer bytes are returned only when the source ends first; a read at or
    /// past the end returns an empty buffer.
    async fn read_at(&self, position: u64, length: usize) -> CarResult<Bytes>;

    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release whatever the source holds open. Reads after a close fail with
    /// [`CarError::SourceClosed`].
    async fn close(&self) -> CarResult<()> {
        Ok(())
    }
}

/// Clamp a read so it never extends past `total`.
fn clamp(position: u64, length: usize, total: u64) -> usize {
    let remaining = total.saturating_sub(position);
    usize::try_from(remaining).map_or(length, |r| length.min(r))
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// An archive on local disk, read with positioned reads on the blocking pool.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: Mutex<Option<Arc<File>>>,
    len: u64,
}

impl FileSource {
    /// Open the archive at `path` and record its length.
    pub async fn open(path: impl AsRef<Path>) -> CarResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?.into_std().await;
        let len = file.metadata()?.len();
        debug!(path = %path.display(), len, "opened archive");
        Ok(Self {
            path,
            file: Mutex::new(Some(Arc::new(file))),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn read_at(&self, position: u64, length: usize) -> CarResult<Bytes> {
        let length = clamp(position, length, self.len);
        if length == 0 {
            return Ok(Bytes::new());
        }
        let file = self
            .file
            .lock()
            .expect("lock poisoned")
            .clone()
            .ok_or(CarError::SourceClosed)?;
        let buf = tokio::task::spawn_blocking(move || read_full_at(&file, position, length))
            .await
            .map_err(io::Error::other)??;
        Ok(Bytes::from(buf))
    }

    fn len(&self) -> u64 {
        self.len
    }

    async fn close(&self) -> CarResult<()> {
        if self.file.lock().expect("lock poisoned").take().is_some() {
            debug!(path = %self.path.display(), "closed archive");
        }
        Ok(())
    }
}

/// Positioned read that keeps going until `length` bytes or end of file.
fn read_full_at(file: &File, mut position: u64, length: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; length];
    let mut filled = 0;
    while filled < length {
        match pread(file, &mut buf[filled..], position) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                position += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], position: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, position)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], position: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, position)
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// An archive already held in memory. Reads are zero-copy slices.
#[derive(Clone, Debug)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn read_at(&self, position: u64, length: usize) -> CarResult<Bytes> {
        let length = clamp(position, length, self.len());
        if length == 0 {
            return Ok(Bytes::new());
        }
        let start = position as usize;
        Ok(self.data.slice(start..start + length))
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}
