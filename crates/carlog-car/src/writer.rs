use std::path::Path;

use carlog_types::varint;
use cid::Cid;

use crate::error::CarResult;
use crate::header::CarHeader;

/// Builds an archive in memory: header first, then one framed entry per
/// [`push`](Self::push).
pub struct CarWriter {
    buf: Vec<u8>,
    entries: usize,
}

impl CarWriter {
    /// Start an archive with the given header.
    pub fn new(header: &CarHeader) -> CarResult<Self> {
        let encoded = header.encode()?;
        let mut buf = Vec::with_capacity(encoded.len() + varint::MAX_VARINT_LEN);
        buf.extend_from_slice(&varint::encode(encoded.len() as u64));
        buf.extend_from_slice(&encoded);
        Ok(Self { buf, entries: 0 })
    }

    /// Append a block. Identifiers are written as-is; nothing checks that the
    /// digest matches the payload.
    pub fn push(&mut self, cid: &Cid, data: &[u8]) {
        let id = cid.to_bytes();
        let part_size = (id.len() + data.len()) as u64;
        self.buf.extend_from_slice(&varint::encode(part_size));
        self.buf.extend_from_slice(&id);
        self.buf.extend_from_slice(data);
        self.entries += 1;
    }

    /// Number of entries written so far.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// The archive bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Write the archive to `path`, returning its size in bytes.
    pub async fn write_to(self, path: impl AsRef<Path>) -> CarResult<u64> {
        let len = self.buf.len() as u64;
        tokio::fs::write(path, self.buf).await?;
        Ok(len)
    }
}
