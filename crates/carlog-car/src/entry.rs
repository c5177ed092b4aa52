use bytes::Bytes;
use cid::Cid;

/// One framed entry as it was found in the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramingEntry {
    /// Identifier of the block.
    pub cid: Cid,
    /// Byte offset of the entry's `partSize` varint in the archive.
    pub offset: u64,
    /// Framed size: identifier bytes plus payload bytes.
    pub part_size: u64,
    /// Block payload.
    pub bytes: Bytes,
}

impl FramingEntry {
    /// Drop the framing metadata, keeping the identifier and payload.
    pub fn into_block(self) -> Block {
        Block {
            cid: self.cid,
            bytes: self.bytes,
        }
    }
}

/// An (identifier, payload) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub cid: Cid,
    pub bytes: Bytes,
}

impl From<FramingEntry> for Block {
    fn from(entry: FramingEntry) -> Self {
        entry.into_block()
    }
}
