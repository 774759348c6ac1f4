use std::io::{Read, Seek, SeekFrom, Write};

use chrono::{DateTime, Utc};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::dostime::to_dos;
use crate::entry::{MemberEntry, ZipCompression};
use crate::error::{ZipError, ZipResult};
use crate::escape::escape_name;
use crate::header::{DataDescriptor, LocalFileHeader};

/// Largest up-front allocation made from a directory-declared size.
const MAX_PREALLOC: u64 = 64 << 20;

/// Streams one member without knowing its size in advance.
///
/// [`begin`](Self::begin) yields the local header, every
/// [`encode`](Self::encode) yields the next run of member data, and
/// [`finish`](Self::finish) yields the tail plus the data descriptor. The
/// caller writes each chunk contiguously at the member's offset.
pub struct MemberEncoder {
    entry: MemberEntry,
    crc: crc32fast::Hasher,
    deflate: Option<DeflateEncoder<Vec<u8>>>,
}

impl MemberEncoder {
    pub fn begin(
        name: &str,
        compression: ZipCompression,
        header_offset: u64,
        modified: DateTime<Utc>,
    ) -> ZipResult<(Self, Vec<u8>)> {
        let (dos_time, dos_date) = to_dos(modified);
        let header =
            LocalFileHeader::streamed(&escape_name(name), compression.method(), dos_time, dos_date)
                .encode()?;
        let entry = MemberEntry {
            name: name.to_string(),
            compression,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            header_offset,
            data_offset: header_offset + header.len() as u64,
            modified,
        };
        let deflate = match compression {
            ZipCompression::Stored => None,
            ZipCompression::Deflate => Some(DeflateEncoder::new(Vec::new(), Compression::default())),
        };
        Ok((
            Self {
                entry,
                crc: crc32fast::Hasher::new(),
                deflate,
            },
            header,
        ))
    }

    /// Feed member data; returns the bytes to append.
    pub fn encode(&mut self, data: &[u8]) -> ZipResult<Vec<u8>> {
        self.crc.update(data);
        self.entry.uncompressed_size += data.len() as u64;
        let out = match &mut self.deflate {
            None => data.to_vec(),
            Some(encoder) => {
                encoder
                    .write_all(data)
                    .map_err(|e| ZipError::CompressionFailed(e.to_string()))?;
                std::mem::take(encoder.get_mut())
            }
        };
        self.entry.compressed_size += out.len() as u64;
        Ok(out)
    }

    /// Finish the member; returns its directory entry and the final bytes
    /// (compressor tail and data descriptor).
    pub fn finish(mut self) -> ZipResult<(MemberEntry, Vec<u8>)> {
        let mut out = match self.deflate.take() {
            None => Vec::new(),
            Some(encoder) => encoder
                .finish()
                .map_err(|e| ZipError::CompressionFailed(e.to_string()))?,
        };
        self.entry.compressed_size += out.len() as u64;
        self.entry.crc32 = self.crc.finalize();
        out.extend_from_slice(
            &DataDescriptor {
                crc32: self.entry.crc32,
                compressed_size: self.entry.compressed_size,
                uncompressed_size: self.entry.uncompressed_size,
            }
            .encode(),
        );
        Ok((self.entry, out))
    }

    /// The entry as known so far.
    pub fn entry(&self) -> &MemberEntry {
        &self.entry
    }
}

/// Decompress a member's raw bytes and verify length and CRC32.
pub fn decode_member(entry: &MemberEntry, raw: &[u8]) -> ZipResult<Vec<u8>> {
    if raw.len() as u64 != entry.compressed_size {
        return Err(ZipError::SizeMismatch {
            name: entry.name.clone(),
            expected: entry.compressed_size,
            actual: raw.len() as u64,
        });
    }
    let data = match entry.compression {
        ZipCompression::Stored => raw.to_vec(),
        ZipCompression::Deflate => {
            let mut out = Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOC) as usize);
            DeflateDecoder::new(raw)
                .read_to_end(&mut out)
                .map_err(|e| ZipError::DecompressionFailed {
                    name: entry.name.clone(),
                    reason: e.to_string(),
                })?;
            out
        }
    };
    if data.len() as u64 != entry.uncompressed_size {
        return Err(ZipError::SizeMismatch {
            name: entry.name.clone(),
            expected: entry.uncompressed_size,
            actual: data.len() as u64,
        });
    }
    let actual = crc32fast::hash(&data);
    if actual != entry.crc32 {
        return Err(ZipError::CrcMismatch {
            name: entry.name.clone(),
            expected: entry.crc32,
            actual,
        });
    }
    Ok(data)
}

/// Read and decode a member from a seekable archive.
pub fn read_member<R: Read + Seek>(reader: &mut R, entry: &MemberEntry) -> ZipResult<Vec<u8>> {
    reader.seek(SeekFrom::Start(entry.data_offset))?;
    let mut raw = Vec::with_capacity(entry.compressed_size.min(MAX_PREALLOC) as usize);
    reader
        .by_ref()
        .take(entry.compressed_size)
        .read_to_end(&mut raw)?;
    decode_member(entry, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(name: &str, compression: ZipCompression, parts: &[&[u8]]) -> (MemberEntry, Vec<u8>) {
        let (mut encoder, mut bytes) = MemberEncoder::begin(name, compression, 0, Utc::now()).unwrap();
        for part in parts {
            bytes.extend(encoder.encode(part).unwrap());
        }
        let (entry, tail) = encoder.finish().unwrap();
        bytes.extend(tail);
        (entry, bytes)
    }

    #[test]
    fn stored_member_layout() {
        let (entry, bytes) = encode_all("m", ZipCompression::Stored, &[b"hello ", b"world"]);
        assert_eq!(entry.uncompressed_size, 11);
        assert_eq!(entry.compressed_size, 11);
        assert_eq!(entry.crc32, crc32fast::hash(b"hello world"));
        assert_eq!(entry.data_offset, 31);
        assert_eq!(&bytes[31..42], b"hello world");
        assert_eq!(bytes.len(), 31 + 11 + 16);
    }

    #[test]
    fn deflate_member_roundtrip() {
        let data = vec![0x5au8; 100_000];
        let (entry, bytes) = encode_all("big", ZipCompression::Deflate, &[&data[..40_000], &data[40_000..]]);
        assert!(entry.compressed_size < entry.uncompressed_size);
        let raw = &bytes[entry.data_range().start as usize..entry.data_range().end as usize];
        assert_eq!(decode_member(&entry, raw).unwrap(), data);
    }

    #[test]
    fn escaped_name_in_header() {
        let (entry, bytes) = encode_all("aff4://x/y", ZipCompression::Stored, &[]);
        assert_eq!(entry.name, "aff4://x/y");
        assert_eq!(&bytes[30..entry.data_offset as usize], b"aff4%3A//x/y");
    }

    #[test]
    fn crc_mismatch_detected() {
        let (entry, bytes) = encode_all("m", ZipCompression::Stored, &[b"abc"]);
        let mut raw = bytes[entry.data_offset as usize..entry.data_offset as usize + 3].to_vec();
        raw[0] ^= 0xff;
        assert!(matches!(
            decode_member(&entry, &raw),
            Err(ZipError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn truncated_raw_is_size_mismatch() {
        let (entry, _) = encode_all("m", ZipCompression::Stored, &[b"abcdef"]);
        assert!(decode_member(&entry, b"abc").unwrap_err().is_integrity());
    }

    #[test]
    fn garbage_deflate_fails() {
        let (mut entry, _) = encode_all("m", ZipCompression::Deflate, &[b"abc"]);
        entry.compressed_size = 4;
        assert!(decode_member(&entry, &[0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
