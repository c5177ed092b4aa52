use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use carlog_types::Cid;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::segment::SegmentLog;
use crate::shard::ShardIndex;

/// Point-in-time counters for a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStats {
    /// Segment new writes go to.
    pub current_segment: u64,
    pub open_segments: usize,
    pub opened_shards: usize,
}

/// Content-addressed block store.
///
/// Block bytes are appended to segment logs under `<root>/logs`; each
/// identifier's location is recorded in one of the shards under
/// `<root>/index`. Blocks are immutable: storing an identifier that is
/// already indexed is a no-op.
///
/// Two concurrent puts of the same identifier may both append their bytes.
/// The index then keeps whichever location was recorded last and the other
/// copy is unreachable.
pub struct SegmentedStore {
    config: StoreConfig,
    segments: SegmentLog,
    index: ShardIndex,
    closed: AtomicBool,
}

impl SegmentedStore {
    /// Open (or create) the store described by `config`.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(config.logs_dir()).await?;
        tokio::fs::create_dir_all(config.index_dir()).await?;

        let segments = SegmentLog::initialize(config.logs_dir(), config.max_segment_size).await?;
        let index = ShardIndex::new(config.index_dir(), config.bucket_count)?;
        info!(
            root = %config.root.display(),
            buckets = config.bucket_count,
            segment = segments.current_id(),
            "opened store"
        );

        Ok(Self {
            config,
            segments,
            index,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Store `bytes` under `cid`. Returns `false` without writing anything
    /// when `cid` is already present.
    pub async fn put(&self, cid: &Cid, bytes: Bytes) -> StoreResult<bool> {
        self.ensure_open()?;
        if self.index.has(cid).await? {
            return Ok(false);
        }
        let location = self.segments.write_bytes(bytes).await?;
        self.index.put(cid, location).await?;
        debug!(%cid, segment = location.segment, offset = location.offset, len = location.length, "stored block");
        Ok(true)
    }

    pub async fn has(&self, cid: &Cid) -> StoreResult<bool> {
        self.ensure_open()?;
        self.index.has(cid).await
    }

    /// Fetch the bytes stored under `cid`.
    pub async fn get(&self, cid: &Cid) -> StoreResult<Bytes> {
        self.ensure_open()?;
        let location = self.index.get(cid).await?;
        self.segments
            .read_range(location.segment, location.offset, location.length)
            .await
    }

    /// Close every shard and segment. Both sets are closed concurrently and
    /// both are waited for even if one fails.
    pub async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let (index, segments) = tokio::join!(self.index.close_all(), self.segments.close_all());
        info!(root = %self.config.root.display(), "closed store");
        index.and(segments)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            current_segment: self.segments.current_id(),
            open_segments: self.segments.open_segments(),
            opened_shards: self.index.opened_shards(),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    pub(crate) fn index(&self) -> &ShardIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use multihash::Multihash;

    fn block(i: u32) -> (Cid, Bytes) {
        let data = format!("block number {i} ").repeat(1 + (i as usize % 5));
        let digest = blake3::hash(data.as_bytes());
        let mh = Multihash::<64>::wrap(0x1e, digest.as_bytes()).unwrap();
        (Cid::new_v1(0x55, mh), Bytes::from(data))
    }

    fn config(root: &Path) -> StoreConfig {
        StoreConfig {
            bucket_count: 4,
            ..StoreConfig::with_root(root)
        }
    }

    fn segment_len(root: &Path, id: u64) -> u64 {
        std::fs::metadata(root.join("logs").join(format!("{id}.log")))
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("db");
        let store = SegmentedStore::open(config(&root)).await.unwrap();
        assert!(root.join("logs").is_dir());
        assert!(root.join("index").is_dir());
        assert_eq!(
            store.stats(),
            StoreStats {
                current_segment: 0,
                open_segments: 1,
                opened_shards: 0
            }
        );
    }

    #[tokio::test]
    async fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentedStore::open(config(dir.path())).await.unwrap();

        let (cid, data) = block(1);
        assert!(!store.has(&cid).await.unwrap());
        assert!(store.put(&cid, data.clone()).await.unwrap());
        assert!(store.has(&cid).await.unwrap());
        assert_eq!(store.get(&cid).await.unwrap(), data);
    }

    #[tokio::test]
    async fn second_put_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentedStore::open(config(dir.path())).await.unwrap();

        let (cid, data) = block(2);
        assert!(store.put(&cid, data.clone()).await.unwrap());
        let len = segment_len(dir.path(), 0);

        assert!(!store.put(&cid, data.clone()).await.unwrap());
        assert!(!store.put(&cid, Bytes::from_static(b"other")).await.unwrap());
        assert_eq!(segment_len(dir.path(), 0), len);
        assert_eq!(store.get(&cid).await.unwrap(), data);
    }

    #[tokio::test]
    async fn missing_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentedStore::open(config(dir.path())).await.unwrap();
        let (cid, _) = block(3);
        assert!(!store.has(&cid).await.unwrap());
        assert!(matches!(store.get(&cid).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn rotates_segments_and_reads_across_them() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            max_segment_size: 256,
            ..config(dir.path())
        };
        let store = SegmentedStore::open(cfg).await.unwrap();

        let blocks: Vec<_> = (0..40).map(block).collect();
        for (cid, data) in &blocks {
            assert!(store.put(cid, data.clone()).await.unwrap());
        }
        assert!(store.stats().current_segment > 1);
        for (cid, data) in &blocks {
            assert_eq!(&store.get(cid).await.unwrap(), data);
        }
    }

    #[tokio::test]
    async fn concurrent_puts_of_distinct_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            max_segment_size: 1024,
            ..config(dir.path())
        };
        let store = Arc::new(SegmentedStore::open(cfg).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..300 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let (cid, data) = block(i);
                store.put(&cid, data).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        for i in 0..300 {
            let (cid, data) = block(i);
            assert_eq!(store.get(&cid).await.unwrap(), data);
        }
        assert_eq!(store.stats().opened_shards, 4);
    }

    #[tokio::test]
    async fn reopen_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            max_segment_size: 128,
            ..config(dir.path())
        };
        let first: Vec<_> = (0..10).map(block).collect();
        {
            let store = SegmentedStore::open(cfg.clone()).await.unwrap();
            for (cid, data) in &first {
                store.put(cid, data.clone()).await.unwrap();
            }
            store.close().await.unwrap();
        }

        let store = SegmentedStore::open(cfg).await.unwrap();
        let resumed = store.stats().current_segment;
        assert!(resumed > 0);
        let before = segment_len(dir.path(), resumed);

        for (cid, data) in &first {
            assert!(!store.put(cid, data.clone()).await.unwrap());
            assert_eq!(&store.get(cid).await.unwrap(), data);
        }
        let (cid, data) = block(100);
        assert!(store.put(&cid, data.clone()).await.unwrap());
        assert_eq!(segment_len(dir.path(), resumed), before + data.len() as u64);
        assert_eq!(store.get(&cid).await.unwrap(), data);
    }

    #[tokio::test]
    async fn missing_segment_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            max_segment_size: 8,
            ..config(dir.path())
        };
        let (cid, data) = block(5);
        let (other, other_data) = block(6);
        {
            let store = SegmentedStore::open(cfg.clone()).await.unwrap();
            // Each block overflows its segment, so they land in 0 and 1 and
            // segment 2 is created for the next write.
            store.put(&cid, data).await.unwrap();
            store.put(&other, other_data).await.unwrap();
            store.close().await.unwrap();
        }
        std::fs::remove_file(dir.path().join("logs").join("0.log")).unwrap();

        let store = SegmentedStore::open(cfg).await.unwrap();
        assert_eq!(store.stats().current_segment, 2);
        assert!(store.has(&cid).await.unwrap());
        assert!(matches!(store.get(&cid).await, Err(StoreError::SegmentNotFound(0))));
    }

    #[tokio::test]
    async fn reopen_after_rotation_continues_segment_ids() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            max_segment_size: 16,
            ..config(dir.path())
        };
        let (cid, data) = block(8);
        {
            let store = SegmentedStore::open(cfg.clone()).await.unwrap();
            store.put(&cid, data.clone()).await.unwrap();
            assert_eq!(store.stats().current_segment, 1);
            store.close().await.unwrap();
        }

        let store = SegmentedStore::open(cfg).await.unwrap();
        assert_eq!(store.stats().current_segment, 1);
        let (next, next_data) = block(9);
        store.put(&next, next_data).await.unwrap();
        assert_eq!(store.index().get(&next).await.unwrap().segment, 1);
        assert_eq!(segment_len(dir.path(), 0), data.len() as u64);
        assert_eq!(store.get(&cid).await.unwrap(), data);
    }

    #[tokio::test]
    async fn corrupt_index_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentedStore::open(config(dir.path())).await.unwrap();
        let (cid, data) = block(6);
        store.index().put_raw(&cid, b"[1,2,\"x\"]").await.unwrap();

        assert!(matches!(store.get(&cid).await, Err(StoreError::IndexCorrupt { .. })));
        assert!(matches!(store.put(&cid, data).await, Err(StoreError::IndexCorrupt { .. })));
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentedStore::open(config(dir.path())).await.unwrap();
        let (cid, data) = block(7);
        store.put(&cid, data.clone()).await.unwrap();
        store.close().await.unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.put(&cid, data).await, Err(StoreError::Closed)));
        assert!(matches!(store.has(&cid).await, Err(StoreError::Closed)));
        assert!(matches!(store.get(&cid).await, Err(StoreError::Closed)));
        assert!(matches!(store.close().await, Err(StoreError::Closed)));
        assert_eq!(store.stats().open_segments, 0);
        assert_eq!(store.stats().opened_shards, 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            bucket_count: 0,
            ..config(dir.path())
        };
        assert!(matches!(SegmentedStore::open(cfg).await, Err(StoreError::Config(_))));
    }
}
