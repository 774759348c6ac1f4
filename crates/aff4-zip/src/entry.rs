use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ZipError, ZipResult};

/// Compression method of a member.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZipCompression {
    #[default]
    Stored,
    /// Raw deflate, no zlib wrapper.
    Deflate,
}

impl ZipCompression {
    /// The ZIP method number.
    pub fn method(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
        }
    }

    pub fn from_method(method: u16) -> ZipResult<Self> {
        match method {
            0 => Ok(Self::Stored),
            8 => Ok(Self::Deflate),
            other => Err(ZipError::UnsupportedCompression(other)),
        }
    }
}

/// Everything the central directory records about one member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberEntry {
    /// Unescaped member name.
    pub name: String,
    pub compression: ZipCompression,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Offset of the local file header.
    pub header_offset: u64,
    /// Offset of the first data byte, past the local header.
    pub data_offset: u64,
    pub modified: DateTime<Utc>,
}

impl MemberEntry {
    /// Returns `true` if any field needs a Zip64 extension.
    pub fn needs_zip64(&self) -> bool {
        self.compressed_size >= u32::MAX as u64
            || self.uncompressed_size >= u32::MAX as u64
            || self.header_offset >= u32::MAX as u64
    }

    /// Byte range of the compressed data.
    pub fn data_range(&self) -> std::ops::Range<u64> {
        self.data_offset..self.data_offset + self.compressed_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_numbers() {
        assert_eq!(ZipCompression::Stored.method(), 0);
        assert_eq!(ZipCompression::Deflate.method(), 8);
        assert_eq!(ZipCompression::from_method(8).unwrap(), ZipCompression::Deflate);
        assert!(matches!(
            ZipCompression::from_method(12),
            Err(ZipError::UnsupportedCompression(12))
        ));
    }

    #[test]
    fn zip64_threshold() {
        let mut entry = MemberEntry {
            name: "m".into(),
            compression: ZipCompression::Stored,
            crc32: 0,
            compressed_size: 10,
            uncompressed_size: 10,
            header_offset: 0,
            data_offset: 31,
            modified: Utc::now(),
        };
        assert!(!entry.needs_zip64());
        entry.header_offset = 5 << 30;
        assert!(entry.needs_zip64());
        assert_eq!(entry.data_range(), 31..41);
    }
}
