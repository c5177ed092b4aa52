//! Append-only segment files.
//!
//! Blocks are appended to the current segment, `<dir>/<id>.log`. A write
//! reserves its byte range with one atomic add on the segment's offset
//! counter, and the data lands later through a positioned write. Concurrent
//! writers therefore get disjoint ranges no matter how their I/O interleaves.
//! Once a reservation carries a segment past the rotation threshold, later
//! writes go to the next id, and the write that crossed creates that next
//! segment alongside its own I/O. The crossing write still completes in the
//! old segment, so a segment can end up somewhat larger than the threshold.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{StoreError, StoreResult};
use crate::location::Location;

const SEGMENT_EXT: &str = "log";

/// One open segment file.
#[derive(Debug)]
pub struct Segment {
    id: u64,
    file: Arc<File>,
    next_offset: AtomicU64,
}

impl Segment {
    async fn open(id: u64, path: PathBuf, create: bool) -> StoreResult<Self> {
        let result = tokio::task::spawn_blocking(move || -> io::Result<(File, u64)> {
            // No append mode: positioned writes are ignored under O_APPEND.
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(create)
                .open(&path)?;
            let len = file.metadata()?.len();
            Ok((file, len))
        })
        .await?;

        let (file, len) = match result {
            Ok(opened) => opened,
            Err(e) if !create && e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::SegmentNotFound(id))
            }
            Err(source) if create => return Err(StoreError::IoWrite { segment: id, source }),
            Err(source) => return Err(StoreError::IoRead { segment: id, source }),
        };

        debug!(segment = id, len, "opened segment");
        Ok(Self {
            id,
            file: Arc::new(file),
            next_offset: AtomicU64::new(len),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Offset the next reservation will start at.
    pub fn next_offset(&self) -> u64 {
        self.next_offset.load(Ordering::SeqCst)
    }

    fn reserve(&self, len: u64) -> u64 {
        self.next_offset.fetch_add(len, Ordering::SeqCst)
    }

    async fn sync(&self) -> StoreResult<()> {
        let file = Arc::clone(&self.file);
        let segment = self.id;
        tokio::task::spawn_blocking(move || file.sync_data())
            .await?
            .map_err(|source| StoreError::IoWrite { segment, source })
    }
}

type SegmentCell = Arc<OnceCell<Arc<Segment>>>;

/// The set of segment files under one directory.
pub struct SegmentLog {
    dir: PathBuf,
    max_segment_size: u64,
    current: Mutex<u64>,
    segments: Mutex<HashMap<u64, SegmentCell>>,
}

impl SegmentLog {
    /// Scan `dir` for existing segments and resume the highest id, or create
    /// segment 0 when there are none. The resumed segment's write offset
    /// starts at its current length.
    pub async fn initialize(dir: impl AsRef<Path>, max_segment_size: u64) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut current = 0;
        let mut found = 0usize;

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = segment_id(&entry.path()) {
                current = current.max(id);
                found += 1;
            }
        }
        info!(dir = %dir.display(), segments = found, current, "initialized segment log");

        let log = Self {
            dir,
            max_segment_size,
            current: Mutex::new(current),
            segments: Mutex::new(HashMap::new()),
        };
        log.segment(current, true).await?;
        Ok(log)
    }

    /// Id of the segment new writes go to.
    pub fn current_id(&self) -> u64 {
        *self.current.lock().expect("lock poisoned")
    }

    pub fn max_segment_size(&self) -> u64 {
        self.max_segment_size
    }

    /// Number of segment files currently held open.
    pub fn open_segments(&self) -> usize {
        self.segments
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn segment_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.{SEGMENT_EXT}"))
    }

    /// Append `bytes` to the current segment and return where they landed.
    pub async fn write_bytes(&self, bytes: Bytes) -> StoreResult<Location> {
        let id = self.current_id();
        let segment = self.segment(id, true).await?;

        let len = bytes.len() as u64;
        let start = segment.reserve(len);
        let rotated = start + len > self.max_segment_size && self.rotate_from(id);

        let write = write_at(Arc::clone(&segment.file), id, bytes, start);
        let next = async {
            if rotated {
                self.segment(id + 1, true).await.map(drop)
            } else {
                Ok(())
            }
        };
        let (written, next) = tokio::join!(write, next);
        written?;
        next?;

        Ok(Location::new(id, start, len))
    }

    /// Read exactly `length` bytes at `offset` in segment `id`.
    pub async fn read_range(&self, id: u64, offset: u64, length: u64) -> StoreResult<Bytes> {
        let segment = self.segment(id, false).await?;
        let length = usize::try_from(length).map_err(|_| StoreError::IoRead {
            segment: id,
            source: io::Error::new(io::ErrorKind::InvalidInput, "length does not fit in memory"),
        })?;

        let file = Arc::clone(&segment.file);
        let buf = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; length];
            read_exact_at(&file, &mut buf, offset).map(|()| buf)
        })
        .await?
        .map_err(|source| StoreError::IoRead { segment: id, source })?;

        Ok(Bytes::from(buf))
    }

    /// Sync and release every open segment. Segments are synced
    /// concurrently and all are waited for; the first failure is returned.
    pub async fn close_all(&self) -> StoreResult<()> {
        let cells: Vec<SegmentCell> = self
            .segments
            .lock()
            .expect("lock poisoned")
            .drain()
            .map(|(_, cell)| cell)
            .collect();

        let mut syncs = JoinSet::new();
        for cell in cells {
            if let Some(segment) = cell.get().cloned() {
                syncs.spawn(async move { (segment.id(), segment.sync().await) });
            }
        }

        let mut first_err = None;
        let mut closed = 0usize;
        while let Some(joined) = syncs.join_next().await {
            match joined {
                Ok((_, Ok(()))) => closed += 1,
                Ok((segment, Err(e))) => {
                    error!(segment, error = %e, "failed to close segment");
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "segment close task failed");
                    first_err.get_or_insert(e.into());
                }
            }
        }
        debug!(closed, "closed segments");
        first_err.map_or(Ok(()), Err)
    }

    /// Move writes from `id` to `id + 1`. Returns whether this call did the
    /// move; later crossings of the same segment are no-ops.
    fn rotate_from(&self, id: u64) -> bool {
        let mut current = self.current.lock().expect("lock poisoned");
        if *current != id {
            return false;
        }
        *current = id + 1;
        debug!(from = id, to = id + 1, "rotating segment");
        true
    }

    async fn segment(&self, id: u64, create: bool) -> StoreResult<Arc<Segment>> {
        let cell = Arc::clone(
            self.segments
                .lock()
                .expect("lock poisoned")
                .entry(id)
                .or_default(),
        );
        let path = self.segment_path(id);
        let segment = cell
            .get_or_try_init(|| async move { Segment::open(id, path, create).await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(segment))
    }
}

async fn write_at(file: Arc<File>, segment: u64, bytes: Bytes, offset: u64) -> StoreResult<()> {
    tokio::task::spawn_blocking(move || write_all_at(&file, &bytes, offset))
        .await?
        .map_err(|source| StoreError::IoWrite { segment, source })
}

/// Parse `<id>.log`; anything else is ignored.
fn segment_id(path: &Path) -> Option<u64> {
    if path.extension()? != SEGMENT_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
