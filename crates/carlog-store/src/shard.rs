//! Location index, split into `B` independently opened shards.
//!
//! Each shard is its own fjall database at `<dir>/<bucket>`, opened the first
//! time a key hashes to it. Keys are the canonical string form of the
//! identifier; values are JSON-encoded [`Location`]s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use carlog_types::Cid;
use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{StoreError, StoreResult};
use crate::location::Location;

const LOCATIONS: &str = "locations";

/// Map an identifier to a bucket in `0..bucket_count`.
///
/// Takes the last four bytes of the raw identifier as a big-endian integer
/// and scales it into range. Identifiers shorter than four bytes are
/// left-padded with zeros.
pub fn bucket_of(cid: &Cid, bucket_count: u32) -> u32 {
    let bytes = cid.to_bytes();
    let n = bytes.len().min(4);
    let mut tail = [0u8; 4];
    tail[4 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    let num = u64::from(u32::from_be_bytes(tail));
    ((num * u64::from(bucket_count)) >> 32) as u32
}

/// One opened shard database.
pub struct Shard {
    bucket: u32,
    db: Database,
    locations: Keyspace,
}

impl Shard {
    fn open(path: &Path, bucket: u32) -> StoreResult<Self> {
        let db = Database::builder(path).open()?;
        let locations = db.keyspace(LOCATIONS, KeyspaceCreateOptions::default)?;
        debug!(bucket, path = %path.display(), "opened shard");
        Ok(Self {
            bucket,
            db,
            locations,
        })
    }

    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    fn get(&self, key: &str) -> StoreResult<Option<Location>> {
        match self.locations.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(Location::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, location: &Location) -> StoreResult<()> {
        self.locations
            .insert(key.as_bytes(), location.encode().as_slice())?;
        Ok(())
    }

    #[cfg(test)]
    fn insert_raw(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.locations.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn persist(&self) -> StoreResult<()> {
        self.db.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

type ShardCell = Arc<OnceCell<Arc<Shard>>>;

/// Identifier → location index over lazily opened shards.
pub struct ShardIndex {
    dir: PathBuf,
    bucket_count: u32,
    shards: Mutex<HashMap<u32, ShardCell>>,
}

impl ShardIndex {
    pub fn new(dir: impl Into<PathBuf>, bucket_count: u32) -> StoreResult<Self> {
        if bucket_count == 0 {
            return Err(StoreError::Config("bucket_count must be at least 1".into()));
        }
        Ok(Self {
            dir: dir.into(),
            bucket_count,
            shards: Mutex::new(HashMap::new()),
        })
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    pub fn bucket_of(&self, cid: &Cid) -> u32 {
        bucket_of(cid, self.bucket_count)
    }

    /// Number of shards opened so far.
    pub fn opened_shards(&self) -> usize {
        self.shards
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Open shard `bucket`, or return it if already open.
    ///
    /// Concurrent callers share one in-flight open. A failed open is not
    /// cached; the next caller tries again.
    pub async fn open_shard(&self, bucket: u32) -> StoreResult<Arc<Shard>> {
        let cell = Arc::clone(
            self.shards
                .lock()
                .expect("lock poisoned")
                .entry(bucket)
                .or_default(),
        );
        let path = self.dir.join(bucket.to_string());
        let shard = cell
            .get_or_try_init(|| async move {
                let shard = tokio::task::spawn_blocking(move || Shard::open(&path, bucket)).await??;
                Ok::<_, StoreError>(Arc::new(shard))
            })
            .await?;
        Ok(Arc::clone(shard))
    }

    /// Record the location of `cid`, replacing any previous one.
    pub async fn put(&self, cid: &Cid, location: Location) -> StoreResult<()> {
        let shard = self.open_shard(self.bucket_of(cid)).await?;
        let key = cid.to_string();
        tokio::task::spawn_blocking(move || shard.put(&key, &location)).await?
    }

    /// Look up the location of `cid`.
    pub async fn get(&self, cid: &Cid) -> StoreResult<Location> {
        let shard = self.open_shard(self.bucket_of(cid)).await?;
        let key = cid.to_string();
        tokio::task::spawn_blocking(move || {
            shard.get(&key)?.ok_or(StoreError::NotFound(key))
        })
        .await?
    }

    pub async fn has(&self, cid: &Cid) -> StoreResult<bool> {
        match self.get(cid).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Persist and release every opened shard. Shards are persisted
    /// concurrently and all are waited for; the first failure is returned.
    pub async fn close_all(&self) -> StoreResult<()> {
        let cells: Vec<ShardCell> = self
            .shards
            .lock()
            .expect("lock poisoned")
            .drain()
            .map(|(_, cell)| cell)
            .collect();

        let mut persists = JoinSet::new();
        for cell in cells {
            if let Some(shard) = cell.get().cloned() {
                persists.spawn_blocking(move || (shard.bucket(), shard.persist()));
            }
        }

        let mut first_err = None;
        let mut closed = 0usize;
        while let Some(joined) = persists.join_next().await {
            match joined {
                Ok((_, Ok(()))) => closed += 1,
                Ok((bucket, Err(e))) => {
                    error!(bucket, error = %e, "failed to close shard");
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "shard close task failed");
                    first_err.get_or_insert(e.into());
                }
            }
        }
        debug!(closed, "closed shards");
        first_err.map_or(Ok(()), Err)
    }

    /// Store a raw value under the key of `cid`, bypassing encoding.
    #[cfg(test)]
    pub(crate) async fn put_raw(&self, cid: &Cid, value: &[u8]) -> StoreResult<()> {
        let shard = self.open_shard(self.bucket_of(cid)).await?;
        let key = cid.to_string();
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || shard.insert_raw(&key, &value)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multihash::Multihash;

    fn cid(seed: u32) -> Cid {
        let digest = blake3::hash(&seed.to_le_bytes());
        let mh = Multihash::<64>::wrap(0x1e, digest.as_bytes()).unwrap();
        Cid::new_v1(0x55, mh)
    }

    #[test]
    fn bucket_uses_last_four_bytes() {
        let id = cid(1);
        let bytes = id.to_bytes();
        let tail = u32::from_be_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        let expected = ((tail as f64 / 4_294_967_296.0) * 256.0).floor() as u32;
        assert_eq!(bucket_of(&id, 256), expected);
    }

    #[test]
    fn buckets_are_deterministic_and_in_range() {
        for count in [1u32, 4, 256, 1000] {
            for seed in 0..500 {
                let id = cid(seed);
                let b = bucket_of(&id, count);
                assert!(b < count);
                assert_eq!(b, bucket_of(&id, count));
            }
        }
        assert_eq!(bucket_of(&cid(9), 1), 0);
    }

    #[test]
    fn buckets_spread() {
        let mut seen = std::collections::HashSet::new();
        for seed in 0..2000 {
            seen.insert(bucket_of(&cid(seed), 16));
        }
        assert_eq!(seen.len(), 16);
    }

    #[test]
    fn zero_buckets_rejected() {
        assert!(matches!(ShardIndex::new("/tmp/x", 0), Err(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn put_get_has() {
        let dir = tempfile::tempdir().unwrap();
        let index = ShardIndex::new(dir.path(), 4).unwrap();

        let id = cid(42);
        assert!(!index.has(&id).await.unwrap());
        assert!(matches!(index.get(&id).await, Err(StoreError::NotFound(_))));

        let loc = Location::new(2, 512, 64);
        index.put(&id, loc).await.unwrap();
        assert!(index.has(&id).await.unwrap());
        assert_eq!(index.get(&id).await.unwrap(), loc);
        assert!(dir.path().join(index.bucket_of(&id).to_string()).exists());
    }

    #[tokio::test]
    async fn concurrent_opens_share_one_shard() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(ShardIndex::new(dir.path(), 4).unwrap());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move { index.open_shard(3).await.unwrap() }));
        }
        let mut shards = Vec::new();
        for handle in handles {
            shards.push(handle.await.unwrap());
        }
        assert!(shards.iter().all(|s| Arc::ptr_eq(s, &shards[0])));
        assert_eq!(index.opened_shards(), 1);
    }

    #[tokio::test]
    async fn corrupt_value() {
        let dir = tempfile::tempdir().unwrap();
        let index = ShardIndex::new(dir.path(), 4).unwrap();
        let id = cid(7);
        index.put_raw(&id, b"{broken").await.unwrap();

        match index.get(&id).await {
            Err(StoreError::IndexCorrupt { key, .. }) => assert_eq!(key, id.to_string()),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(index.has(&id).await, Err(StoreError::IndexCorrupt { .. })));
    }

    #[tokio::test]
    async fn survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<Cid> = (0..20).map(cid).collect();
        {
            let index = ShardIndex::new(dir.path(), 4).unwrap();
            for (i, id) in ids.iter().enumerate() {
                index.put(id, Location::new(0, i as u64 * 10, 10)).await.unwrap();
            }
            index.close_all().await.unwrap();
            assert_eq!(index.opened_shards(), 0);
        }

        let index = ShardIndex::new(dir.path(), 4).unwrap();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(index.get(id).await.unwrap(), Location::new(0, i as u64 * 10, 10));
        }
    }
}
