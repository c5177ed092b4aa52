//! Segmented block storage for carlog.
//!
//! Blocks are immutable byte strings keyed by content identifier. Their bytes
//! are appended to rotating segment files and their locations are kept in a
//! sharded key-value index:
//!
//! ```text
//! <root>/logs/<id>.log      append-only segment files
//! <root>/index/<bucket>/    one fjall database per bucket
//! ```
//!
//! # Components
//!
//! - [`SegmentLog`] -- reserves disjoint byte ranges and rotates segments
//! - [`ShardIndex`] -- identifier → [`Location`] over lazily opened shards
//! - [`SegmentedStore`] -- `put`/`has`/`get`/`close` on top of both
//! - [`AdmissionLimiter`] -- caps concurrently running store operations
//!
//! # Design Rules
//!
//! 1. A write's byte range is reserved without awaiting, so concurrent writes
//!    never overlap.
//! 2. Shard and segment opens are shared: concurrent openers wait on one open.
//! 3. Nothing is retried; errors propagate to the caller.
//! 4. A block written to a segment whose index update then fails stays in the
//!    segment, unreferenced.

pub mod config;
pub mod error;
pub mod limiter;
pub mod location;
pub mod segment;
pub mod shard;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use limiter::AdmissionLimiter;
pub use location::Location;
pub use segment::SegmentLog;
pub use shard::{bucket_of, ShardIndex};
pub use store::{SegmentedStore, StoreStats};
