//! Foundation codecs for carlog.
//!
//! Every other carlog crate depends on `carlog-types`. It owns the two
//! leaf-level parsers the archive framing is built from:
//!
//! - [`varint`] -- base-128 unsigned varints (decode, encode, cached encode)
//! - [`identifier`] -- self-describing content identifiers (legacy v0 and v1)
//!
//! Identifiers themselves are represented by [`cid::Cid`], re-exported here so
//! downstream crates agree on one type.

pub mod error;
pub mod identifier;
pub mod varint;

pub use cid::Cid;
pub use error::{TypeError, TypeResult};
pub use identifier::{decode_identifier, DecodedIdentifier, IdentifierHeader, IdentifierVersion};
