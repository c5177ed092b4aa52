use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Rotation threshold for segment files.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 1024 * 1000;

/// Store configuration.
///
/// Any field missing from a TOML file keeps its default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store directory; holds `logs/` and `index/`.
    pub root: PathBuf,
    /// Number of index shards.
    pub bucket_count: u32,
    /// A segment stops taking writes once it grows past this many bytes.
    pub max_segment_size: u64,
    /// Cap on concurrently running puts during ingest.
    pub max_in_flight: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("db"),
            bucket_count: 256,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            max_in_flight: 10_000,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.bucket_count == 0 {
            return Err(StoreError::Config("bucket_count must be at least 1".into()));
        }
        if self.max_segment_size == 0 {
            return Err(StoreError::Config("max_segment_size must be at least 1".into()));
        }
        if self.max_in_flight == 0 {
            return Err(StoreError::Config("max_in_flight must be at least 1".into()));
        }
        Ok(())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }
}
