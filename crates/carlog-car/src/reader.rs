use carlog_types::{varint, IdentifierHeader, TypeError};
use tracing::debug;

use crate::entry::FramingEntry;
use crate::error::{CarError, CarResult};
use crate::header::CarHeader;
use crate::source::ByteSource;

/// Bytes read to find the header length varint.
pub const HEADER_PREFIX_LEN: usize = 9;

/// Starting read window: a short `partSize` varint, a v1 identifier prefix
/// and a 32-byte digest all fit.
pub const INITIAL_WINDOW: usize = 42;

/// Streaming archive decoder.
///
/// The header is decoded when the reader is opened; entries are then pulled
/// one at a time with [`next_entry`](Self::next_entry). Each entry costs one
/// windowed read for its framing plus one read for its payload. When an
/// identifier does not fit in the window, the framing is read again at the
/// larger size and the window keeps that size from then on, so a run of
/// entries with the same digest length pays for at most one extra read.
///
/// A reader is single-use: once it returns `None` or an error, it yields
/// nothing more.
pub struct CarReader<S> {
    source: S,
    header: CarHeader,
    cursor: u64,
    len: u64,
    window: usize,
    rereads: u64,
    finished: bool,
}

impl<S: ByteSource> CarReader<S> {
    /// Decode the header of `source` and position the reader on the first
    /// entry.
    pub async fn new(source: S) -> CarResult<Self> {
        let len = source.len();
        let prefix = source.read_at(0, HEADER_PREFIX_LEN).await?;
        let (header_len, width) = varint::decode(&prefix).map_err(|e| CarError::at(0, e))?;
        let header_len = usize::try_from(header_len)
            .map_err(|_| CarError::InvalidHeader(format!("header length {header_len} too large")))?;

        let header_bytes = source.read_at(width as u64, header_len).await?;
        if header_bytes.len() < header_len {
            return Err(CarError::InvalidHeader(format!(
                "expected {header_len} header bytes, archive holds {}",
                header_bytes.len()
            )));
        }
        let header = CarHeader::decode(&header_bytes)?;
        debug!(header_len, archive_len = len, "decoded archive header");

        Ok(Self {
            source,
            header,
            cursor: (width + header_len) as u64,
            len,
            window: INITIAL_WINDOW,
            rereads: 0,
            finished: false,
        })
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Offset of the next entry.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Current framing read size. Only ever grows.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Framing reads repeated because an identifier outgrew the window.
    pub fn rereads(&self) -> u64 {
        self.rereads
    }

    /// Close the underlying byte source. Later calls to
    /// [`next_entry`](Self::next_entry) yield nothing.
    pub async fn close(&mut self) -> CarResult<()> {
        self.finished = true;
        self.source.close().await
    }

    /// Decode the next entry, or `None` at the end of the archive.
    pub async fn next_entry(&mut self) -> CarResult<Option<FramingEntry>> {
        if self.finished {
            return Ok(None);
        }
        let result = self.read_entry().await;
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    async fn read_entry(&mut self) -> CarResult<Option<FramingEntry>> {
        if self.cursor >= self.len {
            return Ok(None);
        }
        let start = self.cursor;

        let mut chunk = self.source.read_at(start, self.window).await?;
        if chunk.is_empty() {
            return Ok(None);
        }

        let (part_size, l0) = varint::decode(&chunk).map_err(|e| CarError::at(start, e))?;
        let id_header = IdentifierHeader::parse(&chunk[l0..]).map_err(|e| match e {
            TypeError::InvalidIdentifierVersion(version) => CarError::InvalidIdentifierVersion {
                version,
                offset: start,
                part_size,
                part_size_len: l0,
                window: chunk.len(),
            },
            other => CarError::at(start, other),
        })?;

        let framing_len = l0 + id_header.total_len();
        if framing_len > self.window {
            self.window = framing_len;
            self.rereads += 1;
            debug!(offset = start, window = framing_len, "growing read window");
            chunk = self.source.read_at(start, framing_len).await?;
        }
        let cid = id_header
            .materialize(&chunk[l0..])
            .map_err(|e| CarError::at(start, e))?;

        let id_len = id_header.total_len() as u64;
        let data_len = part_size.checked_sub(id_len).ok_or_else(|| CarError::TruncatedEntry {
            offset: start,
            reason: format!("part size {part_size} is smaller than its {id_len}-byte identifier"),
        })?;
        let data_len = usize::try_from(data_len).map_err(|_| CarError::TruncatedEntry {
            offset: start,
            reason: format!("payload of {data_len} bytes does not fit in memory"),
        })?;

        let bytes = self
            .source
            .read_at(start + framing_len as u64, data_len)
            .await?;
        if bytes.len() < data_len {
            return Err(CarError::TruncatedEntry {
                offset: start,
                reason: format!("expected {data_len} payload bytes, archive holds {}", bytes.len()),
            });
        }

        self.cursor = start + part_size + l0 as u64;
        Ok(Some(FramingEntry {
            cid,
            offset: start,
            part_size,
            bytes,
        }))
    }
}
