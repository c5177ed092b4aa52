use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Where a block's bytes live: a byte range inside one segment file.
///
/// Serialized as the JSON array `[segment, offset, length]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u64, u64, u64)", into = "(u64, u64, u64)")]
pub struct Location {
    pub segment: u64,
    pub offset: u64,
    pub length: u64,
}

impl Location {
    pub fn new(segment: u64, offset: u64, length: u64) -> Self {
        Self {
            segment,
            offset,
            length,
        }
    }

    /// First byte past the range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("location is three integers")
    }

    /// Decode a stored value. `key` is only used to label the error.
    pub fn decode(key: &str, bytes: &[u8]) -> StoreResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::IndexCorrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

impl From<(u64, u64, u64)> for Location {
    fn from((segment, offset, length): (u64, u64, u64)) -> Self {
        Self::new(segment, offset, length)
    }
}

impl From<Location> for (u64, u64, u64) {
    fn from(loc: Location) -> Self {
        (loc.segment, loc.offset, loc.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_as_json_array() {
        let loc = Location::new(3, 1024, 77);
        assert_eq!(loc.encode(), b"[3,1024,77]");
        assert_eq!(Location::decode("k", b"[3,1024,77]").unwrap(), loc);
        assert_eq!(loc.end(), 1101);
    }

    #[test]
    fn garbage_is_corrupt() {
        let cases: [&[u8]; 4] = [b"not json", b"[1,2]", b"{\"segment\":1}", b""];
        for bad in cases {
            let err = Location::decode("bafy", bad).unwrap_err();
            match err {
                StoreError::IndexCorrupt { key, .. } => assert_eq!(key, "bafy"),
                other => panic!("unexpected error: {other}"),
            }
        }
    }
}
