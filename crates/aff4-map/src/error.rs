//! Error types for the map crate.

/// Errors from building or decoding a map.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MapError {
    /// A serialized offset is not a multiple of the map's block size.
    #[error("offset {offset} is not aligned to block size {block_size}")]
    Unaligned { offset: u64, block_size: u64 },

    /// A line of a text map could not be parsed.
    #[error("malformed map record {record}: {reason}")]
    Malformed { record: usize, reason: String },

    /// A binary record refers to a target the table does not have.
    #[error("target index {index} out of range ({targets} targets)")]
    TargetIndex { index: u32, targets: usize },

    /// A binary map member is not a whole number of records.
    #[error("binary map of {0} bytes is not a whole number of records")]
    BinaryLength(usize),

    /// Periods and block sizes must be non-zero.
    #[error("invalid map geometry: {0}")]
    InvalidGeometry(String),

    #[error("unknown map encoding: {0}")]
    UnknownEncoding(String),
}

/// Convenience result type for map operations.
pub type MapResult<T> = Result<T, MapError>;
