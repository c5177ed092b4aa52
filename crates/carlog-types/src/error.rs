use thiserror::Error;

/// Errors produced by the varint and identifier codecs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("malformed varint: {0}")]
    MalformedVarint(&'static str),

    #[error("invalid identifier version: {0}")]
    InvalidIdentifierVersion(u64),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

pub type TypeResult<T> = Result<T, TypeError>;
