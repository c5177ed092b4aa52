//! Content-addressed archive (CAR) framing for carlog.
//!
//! An archive is a length-prefixed CBOR header followed by a sequence of
//! framed entries:
//!
//! ```text
//! <varint headerLen> <header CBOR>
//! <varint partSize> <identifier> <payload>      (repeated)
//! ```
//!
//! `partSize` covers the identifier and the payload, not its own varint.
//!
//! # Architecture
//!
//! - **ByteSource**: random-access reads (`FileSource` for disk, `MemorySource` for tests)
//! - **CarReader**: streaming decoder with an adaptive framing window
//! - **CarHeader**: the opaque header record, with `version`/`roots` accessors
//! - **CarWriter**: builds archives for fixtures and export

pub mod entry;
pub mod error;
pub mod header;
pub mod reader;
pub mod source;
pub mod writer;

pub use entry::{Block, FramingEntry};
pub use error::{CarError, CarResult};
pub use header::CarHeader;
pub use reader::CarReader;
pub use source::{ByteSource, FileSource, MemorySource};
pub use writer::CarWriter;

#[cfg(test)]
mod tests {
    use super::*;
    use cid::Cid;
    use multihash::Multihash;

    fn block(i: u32) -> (Cid, Vec<u8>) {
        let data = format!("block-{i}").into_bytes();
        let digest = blake3::hash(&data);
        let mh = Multihash::<64>::wrap(0x1e, digest.as_bytes()).unwrap();
        (Cid::new_v1(0x55, mh), data)
    }

    #[tokio::test]
    async fn disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.car");

        let blocks: Vec<_> = (0..50).map(block).collect();
        let mut writer = CarWriter::new(&CarHeader::new(1, &[blocks[0].0])).unwrap();
        for (cid, data) in &blocks {
            writer.push(cid, data);
        }
        writer.write_to(&path).await.unwrap();

        let source = FileSource::open(&path).await.unwrap();
        let mut reader = CarReader::new(source).await.unwrap();
        assert_eq!(reader.header().roots().unwrap(), vec![blocks[0].0]);

        let mut decoded = Vec::new();
        while let Some(entry) = reader.next_entry().await.unwrap() {
            decoded.push(entry.into_block());
        }
        assert_eq!(decoded.len(), blocks.len());
        for (got, (cid, data)) in decoded.iter().zip(&blocks) {
            assert_eq!(&got.cid, cid);
            assert_eq!(got.bytes.as_ref(), data.as_slice());
        }
        assert_eq!(reader.rereads(), 0);
    }

    #[tokio::test]
    async fn large_payload_entry() {
        let (cid, _) = block(0);
        let payload = vec![0xABu8; 300_000];
        let mut writer = CarWriter::new(&CarHeader::new(1, &[])).unwrap();
        writer.push(&cid, &payload);

        let mut reader = CarReader::new(MemorySource::new(writer.finish()))
            .await
            .unwrap();
        let entry = reader.next_entry().await.unwrap().unwrap();
        assert_eq!(entry.bytes.len(), payload.len());
        // partSize needs a three-byte varint here.
        assert_eq!(reader.position(), entry.offset + 3 + entry.part_size);
        assert!(reader.next_entry().await.unwrap().is_none());
    }
}
