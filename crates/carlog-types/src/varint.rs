//! Unsigned base-128 varints.
//!
//! Seven bits per byte, least-significant group first, high bit set on every
//! byte except the last. This is the encoding used for every length and code
//! in the archive framing.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{TypeError, TypeResult};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Upper bound on memoized encodings. Values seen after the cache is full
/// are encoded directly.
const CACHE_CAPACITY: usize = 4096;

/// Decode a varint from the front of `data`. Returns (value, bytes_consumed).
pub fn decode(data: &[u8]) -> TypeResult<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(TypeError::MalformedVarint("value overflows 64 bits"));
        }
        let group = (byte & 0x7F) as u64;
        // The tenth byte may only carry the single remaining bit.
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            return Err(TypeError::MalformedVarint("value overflows 64 bits"));
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(TypeError::MalformedVarint(
        "buffer ended before a terminating byte",
    ))
}

/// Append the encoding of `value` to `buf`.
pub fn encode_into(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

fn cache() -> &'static RwLock<HashMap<u64, Arc<[u8]>>> {
    static CACHE: OnceLock<RwLock<HashMap<u64, Arc<[u8]>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Encode `value`, serving repeated values from a process-wide cache.
pub fn encode(value: u64) -> Arc<[u8]> {
    if let Some(hit) = cache().read().expect("varint cache poisoned").get(&value) {
        return Arc::clone(hit);
    }

    let mut buf = Vec::with_capacity(encoded_len(value));
    encode_into(&mut buf, value);
    let encoded: Arc<[u8]> = buf.into();

    let mut map = cache().write().expect("varint cache poisoned");
    if map.len() < CACHE_CAPACITY {
        map.entry(value).or_insert_with(|| Arc::clone(&encoded));
    }
    encoded
}
