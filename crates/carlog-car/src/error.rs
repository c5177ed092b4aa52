use carlog_types::TypeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CarError {
    #[error("malformed varint at offset {offset}: {reason}")]
    MalformedVarint { offset: u64, reason: &'static str },

    #[error(
        "invalid identifier version {version} at offset {offset} \
         (part size {part_size}, part size width {part_size_len}, window {window})"
    )]
    InvalidIdentifierVersion {
        version: u64,
        offset: u64,
        part_size: u64,
        part_size_len: usize,
        window: usize,
    },

    #[error("invalid identifier at offset {offset}: {reason}")]
    InvalidIdentifier { offset: u64, reason: String },

    #[error("invalid archive header: {0}")]
    InvalidHeader(String),

    #[error("truncated entry at offset {offset}: {reason}")]
    TruncatedEntry { offset: u64, reason: String },

    #[error("archive source is closed")]
    SourceClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CarError {
    /// Attach the archive offset of the entry being parsed to a codec error.
    pub(crate) fn at(offset: u64, err: TypeError) -> Self {
        match err {
            TypeError::MalformedVarint(reason) => Self::MalformedVarint { offset, reason },
            TypeError::InvalidIdentifierVersion(version) => Self::InvalidIdentifierVersion {
                version,
                offset,
                part_size: 0,
                part_size_len: 0,
                window: 0,
            },
            TypeError::InvalidIdentifier(reason) => Self::InvalidIdentifier { offset, reason },
        }
    }
}

pub type CarResult<T> = Result<T, CarError>;
