use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use crate::error::{ImageError, Result};

const ZSTD_LEVEL: i32 = 3;

/// Per-chunk compression recorded in `aff4:compression`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkCompression {
    Stored,
    #[default]
    Zlib,
    Zstd,
}

impl ChunkCompression {
    pub fn name(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Zlib => "zlib",
            Self::Zstd => "zstd",
        }
    }

    /// Compress one chunk. `chunk` is only used for error context.
    pub fn compress(self, chunk: u64, data: &[u8]) -> Result<Vec<u8>> {
        let failed = |e: std::io::Error| ImageError::Compression {
            chunk,
            reason: e.to_string(),
        };
        match self {
            Self::Stored => Ok(data.to_vec()),
            Self::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).map_err(failed)?;
                encoder.finish().map_err(failed)
            }
            Self::Zstd => zstd::encode_all(data, ZSTD_LEVEL).map_err(failed),
        }
    }

    /// Decompress one chunk, requiring exactly `expected_len` bytes out.
    ///
    /// Returns `None` when the data cannot be decoded; callers decide how
    /// to substitute. Decoding stops one byte past `expected_len`, so an
    /// oversized stream is never inflated in full.
    pub fn decompress(self, data: &[u8], expected_len: usize) -> Option<Vec<u8>> {
        let out = match self {
            Self::Stored => data.to_vec(),
            Self::Zlib => read_bounded(ZlibDecoder::new(data), expected_len)?,
            Self::Zstd => read_bounded(zstd::stream::read::Decoder::new(data).ok()?, expected_len)?,
        };
        (out.len() == expected_len).then_some(out)
    }
}

fn read_bounded(decoder: impl Read, expected_len: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    decoder
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}

impl fmt::Display for ChunkCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChunkCompression {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stored" => Ok(Self::Stored),
            "zlib" => Ok(Self::Zlib),
            "zstd" => Ok(Self::Zstd),
            other => Err(ImageError::UnknownCompression(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ChunkCompression; 3] = [
        ChunkCompression::Stored,
        ChunkCompression::Zlib,
        ChunkCompression::Zstd,
    ];

    #[test]
    fn each_method_roundtrips() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        for method in ALL {
            let packed = method.compress(0, &data).unwrap();
            assert_eq!(method.decompress(&packed, data.len()).unwrap(), data, "{method}");
        }
    }

    #[test]
    fn zeros_compress_well() {
        let zeros = vec![0u8; 32 * 1024];
        assert!(ChunkCompression::Zlib.compress(0, &zeros).unwrap().len() < 200);
        assert!(ChunkCompression::Zstd.compress(0, &zeros).unwrap().len() < 200);
    }

    #[test]
    fn garbage_and_wrong_length_are_rejected() {
        assert!(ChunkCompression::Zlib.decompress(b"not zlib", 8).is_none());
        assert!(ChunkCompression::Zstd.decompress(b"not zstd", 8).is_none());
        let packed = ChunkCompression::Zlib.compress(0, b"abcd").unwrap();
        assert!(ChunkCompression::Zlib.decompress(&packed, 5).is_none());
        assert!(ChunkCompression::Stored.decompress(b"abc", 4).is_none());
    }

    #[test]
    fn oversized_output_is_cut_off() {
        let zeros = vec![0u8; 4 * 1024 * 1024];
        for method in [ChunkCompression::Zlib, ChunkCompression::Zstd] {
            let packed = method.compress(0, &zeros).unwrap();
            assert!(method.decompress(&packed, 1024).is_none(), "{method}");
            let bounded = match method {
                ChunkCompression::Zlib => read_bounded(ZlibDecoder::new(&packed[..]), 1024),
                _ => read_bounded(zstd::stream::read::Decoder::new(&packed[..]).unwrap(), 1024),
            };
            assert_eq!(bounded.unwrap().len(), 1025, "{method}");
        }
    }

    #[test]
    fn names_parse_back() {
        for method in ALL {
            assert_eq!(method.name().parse::<ChunkCompression>().unwrap(), method);
        }
        assert!(matches!(
            "lz4".parse::<ChunkCompression>(),
            Err(ImageError::UnknownCompression(_))
        ));
    }
}
