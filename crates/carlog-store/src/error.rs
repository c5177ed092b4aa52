/// Errors from segmented store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No location is indexed for the identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored location could not be decoded.
    #[error("corrupt index entry for {key}: {reason}")]
    IndexCorrupt { key: String, reason: String },

    /// A location names a segment with no file on disk.
    #[error("segment {0} not found")]
    SegmentNotFound(u64),

    #[error("read from segment {segment} failed: {source}")]
    IoRead {
        segment: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("write to segment {segment} failed: {source}")]
    IoWrite {
        segment: u64,
        #[source]
        source: std::io::Error,
    },

    /// Failure inside the key-value engine backing a shard.
    #[error("index error: {0}")]
    Index(#[from] fjall::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// A spawned operation panicked or was cancelled.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
