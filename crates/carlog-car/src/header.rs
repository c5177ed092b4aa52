use std::collections::BTreeMap;

use cid::Cid;
use serde_cbor::Value;

use crate::error::{CarError, CarResult};

/// CBOR tag for an embedded content identifier.
const CID_TAG: u64 = 42;

/// The archive header record.
///
/// The header is carried through unmodified: whatever CBOR value the archive
/// holds is kept as-is. [`version`](Self::version) and [`roots`](Self::roots)
/// read the two conventional fields when they are present.
#[derive(Clone, Debug, PartialEq)]
pub struct CarHeader {
    value: Value,
}

impl CarHeader {
    /// Build a conventional `{ roots, version }` header.
    pub fn new(version: u64, roots: &[Cid]) -> Self {
        let roots = roots
            .iter()
            .map(|cid| {
                // Tag-42 payloads carry a leading identity-multibase byte.
                let mut bytes = vec![0u8];
                bytes.extend_from_slice(&cid.to_bytes());
                Value::Tag(CID_TAG, Box::new(Value::Bytes(bytes)))
            })
            .collect();

        let mut map = BTreeMap::new();
        map.insert(Value::Text("roots".into()), Value::Array(roots));
        map.insert(Value::Text("version".into()), Value::Integer(version.into()));
        Self {
            value: Value::Map(map),
        }
    }

    /// Decode a header from its CBOR bytes.
    pub fn decode(bytes: &[u8]) -> CarResult<Self> {
        let value = serde_cbor::from_slice(bytes)
            .map_err(|e| CarError::InvalidHeader(format!("failed to decode CBOR: {e}")))?;
        Ok(Self { value })
    }

    /// Encode the header back to CBOR.
    pub fn encode(&self) -> CarResult<Vec<u8>> {
        serde_cbor::to_vec(&self.value)
            .map_err(|e| CarError::InvalidHeader(format!("failed to encode CBOR: {e}")))
    }

    /// The decoded header value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The `version` field, if the header is a map carrying a non-negative
    /// integer there.
    pub fn version(&self) -> Option<u64> {
        match self.field("version")? {
            Value::Integer(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// The `roots` field. An absent field yields no roots.
    pub fn roots(&self) -> CarResult<Vec<Cid>> {
        let roots = match self.field("roots") {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(CarError::InvalidHeader("'roots' is not an array".into())),
        };
        roots.iter().map(root_cid).collect()
    }

    fn field(&self, name: &str) -> Option<&Value> {
        match &self.value {
            Value::Map(map) => map.get(&Value::Text(name.to_string())),
            _ => None,
        }
    }
}

impl From<Value> for CarHeader {
    fn from(value: Value) -> Self {
        Self { value }
    }
}

fn root_cid(value: &Value) -> CarResult<Cid> {
    let bytes = match value {
        Value::Tag(CID_TAG, inner) => match inner.as_ref() {
            Value::Bytes(bytes) => bytes,
            _ => return Err(CarError::InvalidHeader("CID tag does not hold bytes".into())),
        },
        Value::Bytes(bytes) => bytes,
        _ => return Err(CarError::InvalidHeader("unexpected root encoding".into())),
    };
    let bytes = match bytes.split_first() {
        Some((&0, rest)) => rest,
        Some(_) => bytes.as_slice(),
        None => return Err(CarError::InvalidHeader("empty root identifier".into())),
    };
    Cid::try_from(bytes).map_err(|e| CarError::InvalidHeader(format!("invalid root: {e}")))
}
