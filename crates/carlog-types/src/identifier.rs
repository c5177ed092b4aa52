//! Content identifiers as they appear inline in archive framing.
//!
//! Two layouts exist on disk:
//!
//! ```text
//! v1:     <varint 1> <varint codec> <varint hash-fn> <varint hash-len> <digest>
//! legacy: <varint 0x12>                               <varint hash-len> <digest>
//! ```
//!
//! The legacy (v0) form has no version prefix at all: its first varint is the
//! sha2-256 multihash code. Parsing therefore treats the leading varint as
//! "version or legacy hash code" and branches on it.

use cid::Cid;

use crate::error::{TypeError, TypeResult};
use crate::varint;

/// Leading varint of an explicit version-1 identifier.
pub const CID_V1: u64 = 1;

/// Multihash code for sha2-256; the leading varint of a legacy identifier.
pub const SHA2_256: u64 = 0x12;

/// Identifier layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentifierVersion {
    V0,
    V1,
}

/// The varint prefix of an identifier, parsed without needing the digest.
///
/// Knowing [`total_len`](Self::total_len) up front lets a reader decide how
/// many bytes it must have buffered before it can materialize the identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentifierHeader {
    pub version: IdentifierVersion,
    /// Content codec. `None` for legacy identifiers, which imply dag-pb.
    pub codec: Option<u64>,
    /// Multihash function code.
    pub hash_code: u64,
    /// Bytes consumed by the varints, up to and including the hash length.
    pub header_len: usize,
    /// Digest length in bytes.
    pub hash_len: usize,
}

impl IdentifierHeader {
    /// Parse the varint prefix of the identifier starting at `window[0]`.
    pub fn parse(window: &[u8]) -> TypeResult<Self> {
        let (lead, mut len) = varint::decode(window)?;

        let (version, codec, hash_code) = match lead {
            CID_V1 => {
                let (codec, l) = varint::decode(&window[len..])?;
                len += l;
                let (hash_code, l) = varint::decode(&window[len..])?;
                len += l;
                (IdentifierVersion::V1, Some(codec), hash_code)
            }
            SHA2_256 => (IdentifierVersion::V0, None, lead),
            other => return Err(TypeError::InvalidIdentifierVersion(other)),
        };

        let (hash_len, l) = varint::decode(&window[len..])?;
        len += l;
        let hash_len = usize::try_from(hash_len).map_err(|_| {
            TypeError::InvalidIdentifier(format!("hash length {hash_len} does not fit in memory"))
        })?;

        Ok(Self {
            version,
            codec,
            hash_code,
            header_len: len,
            hash_len,
        })
    }

    /// Full identifier span: varint prefix plus digest.
    pub fn total_len(&self) -> usize {
        self.header_len + self.hash_len
    }

    /// Build the identifier from a window that holds at least
    /// [`total_len`](Self::total_len) bytes.
    pub fn materialize(&self, window: &[u8]) -> TypeResult<Cid> {
        let span = window.get(..self.total_len()).ok_or_else(|| {
            TypeError::InvalidIdentifier(format!(
                "identifier needs {} bytes, window holds {}",
                self.total_len(),
                window.len()
            ))
        })?;
        Cid::try_from(span).map_err(|e| TypeError::InvalidIdentifier(e.to_string()))
    }
}

/// A fully decoded identifier and how much of the window it occupied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedIdentifier {
    pub cid: Cid,
    /// Header varints plus digest.
    pub consumed: usize,
    pub hash_len: usize,
}

/// Decode the identifier occupying the front of `window`.
pub fn decode_identifier(window: &[u8]) -> TypeResult<DecodedIdentifier> {
    let header = IdentifierHeader::parse(window)?;
    let cid = header.materialize(window)?;
    Ok(DecodedIdentifier {
        cid,
        consumed: header.total_len(),
        hash_len: header.hash_len,
    })
}
