use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("bad {structure} signature at offset {offset}: {actual:#010x}")]
    InvalidMagic {
        structure: &'static str,
        offset: u64,
        actual: u32,
    },

    #[error("corrupt archive at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("no end of central directory record found")]
    MissingDirectory,

    #[error("CRC32 mismatch for member {name}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("size mismatch for member {name}: expected {expected}, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    #[error("decompression failed for member {name}: {reason}")]
    DecompressionFailed { name: String, reason: String },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// A name or comment longer than its 16-bit length field allows.
    #[error("{field} of {len} bytes exceeds the 65535 byte limit")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ZipResult<T> = Result<T, ZipError>;

impl ZipError {
    /// Returns `true` for errors caused by damaged archive structures.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic { .. } | Self::Corrupt { .. } | Self::MissingDirectory
        )
    }

    /// Returns `true` for checksum and length mismatches of member data.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::CrcMismatch { .. } | Self::SizeMismatch { .. })
    }
}
