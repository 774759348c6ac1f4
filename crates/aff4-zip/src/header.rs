//! Fixed ZIP records, little-endian on disk.

use crate::error::{ZipError, ZipResult};

pub const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
pub const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
pub const EOCD_SIG: u32 = 0x0605_4b50;
pub const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
pub const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
pub const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;

pub const LOCAL_HEADER_LEN: usize = 30;
pub const CENTRAL_HEADER_LEN: usize = 46;
pub const EOCD_LEN: usize = 22;
pub const ZIP64_EOCD_LEN: usize = 56;
pub const ZIP64_LOCATOR_LEN: usize = 20;

/// General purpose flag: sizes and CRC follow the data.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose flag: the name is UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

pub const ZIP64_EXTRA_ID: u16 = 0x0001;

const VERSION_NEEDED: u16 = 20;
const VERSION_NEEDED_ZIP64: u16 = 45;
/// Unix host, ZIP format version 4.5.
const VERSION_MADE_BY: u16 = (3 << 8) | 45;

const U16_SENTINEL: u16 = 0xFFFF;
const U32_SENTINEL: u32 = 0xFFFF_FFFF;

/// Bounds-checked little-endian cursor over a record.
pub(crate) struct LeReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> LeReader<'a> {
    /// `base` is the archive offset of `data[0]`, used in error messages.
    pub(crate) fn new(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    pub(crate) fn bytes(&mut self, len: usize) -> ZipResult<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.data.len());
        let Some(end) = end else {
            return Err(ZipError::Corrupt {
                offset: self.base + self.pos as u64,
                reason: format!("record truncated: wanted {len} more bytes"),
            });
        };
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u16(&mut self) -> ZipResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> ZipResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> ZipResult<u64> {
        let b = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn signature(&mut self, expected: u32, structure: &'static str) -> ZipResult<()> {
        let offset = self.base + self.pos as u64;
        let actual = self.u32()?;
        if actual != expected {
            return Err(ZipError::InvalidMagic {
                structure,
                offset,
                actual,
            });
        }
        Ok(())
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn clamp_u32(v: u64) -> u32 {
    if v >= U32_SENTINEL as u64 {
        U32_SENTINEL
    } else {
        v as u32
    }
}

fn clamp_u16(v: u64) -> u16 {
    if v >= U16_SENTINEL as u64 {
        U16_SENTINEL
    } else {
        v as u16
    }
}

fn field_len(field: &'static str, bytes: &[u8]) -> ZipResult<u16> {
    u16::try_from(bytes.len()).map_err(|_| ZipError::FieldTooLong {
        field,
        len: bytes.len(),
    })
}

/// Local file header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub flags: u16,
    pub method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Header for a streamed member: CRC and sizes deferred to the descriptor.
    pub fn streamed(name: &str, method: u16, dos_time: u16, dos_date: u16) -> Self {
        Self {
            flags: FLAG_DATA_DESCRIPTOR | FLAG_UTF8,
            method,
            dos_time,
            dos_date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            name: name.as_bytes().to_vec(),
            extra: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        LOCAL_HEADER_LEN + self.name.len() + self.extra.len()
    }

    pub fn encode(&self) -> ZipResult<Vec<u8>> {
        let name_len = field_len("member name", &self.name)?;
        let extra_len = field_len("extra field", &self.extra)?;
        let mut out = Vec::with_capacity(self.encoded_len());
        put_u32(&mut out, LOCAL_HEADER_SIG);
        put_u16(&mut out, VERSION_NEEDED);
        put_u16(&mut out, self.flags);
        put_u16(&mut out, self.method);
        put_u16(&mut out, self.dos_time);
        put_u16(&mut out, self.dos_date);
        put_u32(&mut out, self.crc32);
        put_u32(&mut out, self.compressed_size);
        put_u32(&mut out, self.uncompressed_size);
        put_u16(&mut out, name_len);
        put_u16(&mut out, extra_len);
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&self.extra);
        Ok(out)
    }

    /// Parse the fixed part. Returns the header (without name and extra)
    /// and the lengths of the variable fields that follow.
    pub fn decode_fixed(data: &[u8], offset: u64) -> ZipResult<(Self, usize, usize)> {
        let mut r = LeReader::new(data, offset);
        r.signature(LOCAL_HEADER_SIG, "local file header")?;
        let _version = r.u16()?;
        let flags = r.u16()?;
        let method = r.u16()?;
        let dos_time = r.u16()?;
        let dos_date = r.u16()?;
        let crc32 = r.u32()?;
        let compressed_size = r.u32()?;
        let uncompressed_size = r.u32()?;
        let name_len = r.u16()? as usize;
        let extra_len = r.u16()? as usize;
        Ok((
            Self {
                flags,
                method,
                dos_time,
                dos_date,
                crc32,
                compressed_size,
                uncompressed_size,
                name: Vec::new(),
                extra: Vec::new(),
            },
            name_len,
            extra_len,
        ))
    }
}

/// Trailing data descriptor of a streamed member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Encodes 8-byte sizes when either size overflows 32 bits.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        put_u32(&mut out, DATA_DESCRIPTOR_SIG);
        put_u32(&mut out, self.crc32);
        if self.compressed_size >= U32_SENTINEL as u64 || self.uncompressed_size >= U32_SENTINEL as u64 {
            put_u64(&mut out, self.compressed_size);
            put_u64(&mut out, self.uncompressed_size);
        } else {
            put_u32(&mut out, self.compressed_size as u32);
            put_u32(&mut out, self.uncompressed_size as u32);
        }
        out
    }
}

/// Central directory file header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    pub flags: u16,
    pub method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub header_offset: u64,
    pub name: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    fn zip64_extra(&self) -> Vec<u8> {
        let mut fields = Vec::new();
        if self.uncompressed_size >= U32_SENTINEL as u64 {
            put_u64(&mut fields, self.uncompressed_size);
        }
        if self.compressed_size >= U32_SENTINEL as u64 {
            put_u64(&mut fields, self.compressed_size);
        }
        if self.header_offset >= U32_SENTINEL as u64 {
            put_u64(&mut fields, self.header_offset);
        }
        if fields.is_empty() {
            return fields;
        }
        let mut extra = Vec::with_capacity(4 + fields.len());
        put_u16(&mut extra, ZIP64_EXTRA_ID);
        put_u16(&mut extra, fields.len() as u16);
        extra.extend_from_slice(&fields);
        extra
    }

    pub fn encode(&self) -> ZipResult<Vec<u8>> {
        let extra = self.zip64_extra();
        let name_len = field_len("member name", &self.name)?;
        let comment_len = field_len("member comment", &self.comment)?;
        let version_needed = if extra.is_empty() {
            VERSION_NEEDED
        } else {
            VERSION_NEEDED_ZIP64
        };
        let mut out = Vec::with_capacity(CENTRAL_HEADER_LEN + self.name.len() + extra.len());
        put_u32(&mut out, CENTRAL_HEADER_SIG);
        put_u16(&mut out, VERSION_MADE_BY);
        put_u16(&mut out, version_needed);
        put_u16(&mut out, self.flags);
        put_u16(&mut out, self.method);
        put_u16(&mut out, self.dos_time);
        put_u16(&mut out, self.dos_date);
        put_u32(&mut out, self.crc32);
        put_u32(&mut out, clamp_u32(self.compressed_size));
        put_u32(&mut out, clamp_u32(self.uncompressed_size));
        put_u16(&mut out, name_len);
        // At most three u64 fields plus their header.
        put_u16(&mut out, extra.len() as u16);
        put_u16(&mut out, comment_len);
        put_u16(&mut out, 0); // disk number start
        put_u16(&mut out, 0); // internal attributes
        put_u32(&mut out, 0o100644 << 16); // external attributes: regular file
        put_u32(&mut out, clamp_u32(self.header_offset));
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&extra);
        out.extend_from_slice(&self.comment);
        Ok(out)
    }

    /// Decode one record from the front of `data`. Returns the record and
    /// its encoded length.
    pub fn decode(data: &[u8], offset: u64) -> ZipResult<(Self, usize)> {
        let mut r = LeReader::new(data, offset);
        r.signature(CENTRAL_HEADER_SIG, "central directory header")?;
        let _made_by = r.u16()?;
        let _needed = r.u16()?;
        let flags = r.u16()?;
        let method = r.u16()?;
        let dos_time = r.u16()?;
        let dos_date = r.u16()?;
        let crc32 = r.u32()?;
        let compressed32 = r.u32()?;
        let uncompressed32 = r.u32()?;
        let name_len = r.u16()? as usize;
        let extra_len = r.u16()? as usize;
        let comment_len = r.u16()? as usize;
        let _disk = r.u16()?;
        let _internal = r.u16()?;
        let _external = r.u32()?;
        let offset32 = r.u32()?;
        let name = r.bytes(name_len)?.to_vec();
        let extra = r.bytes(extra_len)?;
        let comment = r.bytes(comment_len)?.to_vec();

        let mut header = Self {
            flags,
            method,
            dos_time,
            dos_date,
            crc32,
            compressed_size: compressed32 as u64,
            uncompressed_size: uncompressed32 as u64,
            header_offset: offset32 as u64,
            name,
            comment,
        };
        header.apply_zip64_extra(
            extra,
            offset + (CENTRAL_HEADER_LEN + name_len) as u64,
            [uncompressed32, compressed32, offset32],
        )?;
        Ok((header, r.position()))
    }

    fn apply_zip64_extra(&mut self, extra: &[u8], base: u64, raw: [u32; 3]) -> ZipResult<()> {
        let mut r = LeReader::new(extra, base);
        while r.position() + 4 <= extra.len() {
            let id = r.u16()?;
            let len = r.u16()? as usize;
            let body = r.bytes(len)?;
            if id != ZIP64_EXTRA_ID {
                continue;
            }
            let mut fields = LeReader::new(body, base);
            if raw[0] == U32_SENTINEL {
                self.uncompressed_size = fields.u64()?;
            }
            if raw[1] == U32_SENTINEL {
                self.compressed_size = fields.u64()?;
            }
            if raw[2] == U32_SENTINEL {
                self.header_offset = fields.u64()?;
            }
        }
        Ok(())
    }
}

/// End of central directory record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Build the record, saturating fields that overflow into Zip64.
    pub fn new(entries: u64, cd_size: u64, cd_offset: u64, comment: &[u8]) -> Self {
        Self {
            entries: clamp_u16(entries),
            cd_size: clamp_u32(cd_size),
            cd_offset: clamp_u32(cd_offset),
            comment: comment.to_vec(),
        }
    }

    /// Returns `true` if any field is saturated and the Zip64 record rules.
    pub fn is_saturated(&self) -> bool {
        self.entries == U16_SENTINEL || self.cd_size == U32_SENTINEL || self.cd_offset == U32_SENTINEL
    }

    pub fn encode(&self) -> ZipResult<Vec<u8>> {
        let comment_len = field_len("archive comment", &self.comment)?;
        let mut out = Vec::with_capacity(EOCD_LEN + self.comment.len());
        put_u32(&mut out, EOCD_SIG);
        put_u16(&mut out, 0); // this disk
        put_u16(&mut out, 0); // disk with central directory
        put_u16(&mut out, self.entries);
        put_u16(&mut out, self.entries);
        put_u32(&mut out, self.cd_size);
        put_u32(&mut out, self.cd_offset);
        put_u16(&mut out, comment_len);
        out.extend_from_slice(&self.comment);
        Ok(out)
    }

    pub fn decode(data: &[u8], offset: u64) -> ZipResult<Self> {
        let mut r = LeReader::new(data, offset);
        r.signature(EOCD_SIG, "end of central directory")?;
        let _disk = r.u16()?;
        let _cd_disk = r.u16()?;
        let _disk_entries = r.u16()?;
        let entries = r.u16()?;
        let cd_size = r.u32()?;
        let cd_offset = r.u32()?;
        let comment_len = r.u16()? as usize;
        let comment = r.bytes(comment_len)?.to_vec();
        Ok(Self {
            entries,
            cd_size,
            cd_offset,
            comment,
        })
    }
}

/// Zip64 end of central directory record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ZIP64_EOCD_LEN);
        put_u32(&mut out, ZIP64_EOCD_SIG);
        put_u64(&mut out, (ZIP64_EOCD_LEN - 12) as u64);
        put_u16(&mut out, VERSION_MADE_BY);
        put_u16(&mut out, VERSION_NEEDED_ZIP64);
        put_u32(&mut out, 0);
        put_u32(&mut out, 0);
        put_u64(&mut out, self.entries);
        put_u64(&mut out, self.entries);
        put_u64(&mut out, self.cd_size);
        put_u64(&mut out, self.cd_offset);
        out
    }

    pub fn decode(data: &[u8], offset: u64) -> ZipResult<Self> {
        let mut r = LeReader::new(data, offset);
        r.signature(ZIP64_EOCD_SIG, "zip64 end of central directory")?;
        let _record_size = r.u64()?;
        let _made_by = r.u16()?;
        let _needed = r.u16()?;
        let _disk = r.u32()?;
        let _cd_disk = r.u32()?;
        let _disk_entries = r.u64()?;
        let entries = r.u64()?;
        let cd_size = r.u64()?;
        let cd_offset = r.u64()?;
        Ok(Self {
            entries,
            cd_size,
            cd_offset,
        })
    }
}

/// Locates the Zip64 EOCD record; sits just before the classic EOCD.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Zip64Locator {
    pub eocd64_offset: u64,
}

impl Zip64Locator {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ZIP64_LOCATOR_LEN);
        put_u32(&mut out, ZIP64_LOCATOR_SIG);
        put_u32(&mut out, 0);
        put_u64(&mut out, self.eocd64_offset);
        put_u32(&mut out, 1);
        out
    }

    /// `None` when the bytes are not a locator.
    pub fn decode(data: &[u8], offset: u64) -> Option<Self> {
        let mut r = LeReader::new(data, offset);
        r.signature(ZIP64_LOCATOR_SIG, "zip64 locator").ok()?;
        let _disk = r.u32().ok()?;
        let eocd64_offset = r.u64().ok()?;
        Some(Self { eocd64_offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_header_layout() {
        let header = LocalFileHeader::streamed("a/b", 8, 1, 2);
        let bytes = header.encode().unwrap();
        assert_eq!(bytes.len(), LOCAL_HEADER_LEN + 3);
        assert_eq!(&bytes[..4], &LOCAL_HEADER_SIG.to_le_bytes());
        let (parsed, name_len, extra_len) = LocalFileHeader::decode_fixed(&bytes, 0).unwrap();
        assert_eq!(parsed.flags & FLAG_DATA_DESCRIPTOR, FLAG_DATA_DESCRIPTOR);
        assert_eq!(parsed.method, 8);
        assert_eq!((name_len, extra_len), (3, 0));
    }

    #[test]
    fn bad_signature_reports_offset() {
        let err = LocalFileHeader::decode_fixed(&[0u8; LOCAL_HEADER_LEN], 1234).unwrap_err();
        assert!(matches!(err, ZipError::InvalidMagic { offset: 1234, .. }));
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let bytes = LocalFileHeader::streamed("x", 0, 0, 0).encode().unwrap();
        let err = CentralDirectoryHeader::decode(&bytes[..10], 0).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn central_header_zip64_fields() {
        let header = CentralDirectoryHeader {
            flags: FLAG_DATA_DESCRIPTOR,
            method: 0,
            dos_time: 0,
            dos_date: 33,
            crc32: 0xdead_beef,
            compressed_size: 6 << 30,
            uncompressed_size: 6 << 30,
            header_offset: 12,
            name: b"big".to_vec(),
            comment: Vec::new(),
        };
        let bytes = header.encode().unwrap();
        let (parsed, len) = CentralDirectoryHeader::decode(&bytes, 0).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(parsed, header);
    }

    #[test]
    fn descriptor_widens_for_large_sizes() {
        let small = DataDescriptor {
            crc32: 1,
            compressed_size: 10,
            uncompressed_size: 20,
        };
        assert_eq!(small.encode().len(), 16);
        let large = DataDescriptor {
            uncompressed_size: 5 << 30,
            ..small
        };
        assert_eq!(large.encode().len(), 24);
    }

    #[test]
    fn eocd_saturates() {
        let eocd = EndOfCentralDirectory::new(70_000, 10, 1 << 33, b"aff4://x");
        assert!(eocd.is_saturated());
        let parsed = EndOfCentralDirectory::decode(&eocd.encode().unwrap(), 0).unwrap();
        assert_eq!(parsed, eocd);
        assert!(!EndOfCentralDirectory::new(1, 2, 3, b"").is_saturated());
    }

    #[test]
    fn overlong_names_and_comments_are_rejected() {
        let long = "n".repeat(70_000);
        assert!(matches!(
            LocalFileHeader::streamed(&long, 0, 0, 0).encode(),
            Err(ZipError::FieldTooLong { len: 70_000, .. })
        ));
        let header = CentralDirectoryHeader {
            flags: 0,
            method: 0,
            dos_time: 0,
            dos_date: 0,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            header_offset: 0,
            name: b"ok".to_vec(),
            comment: vec![b'c'; 65_536],
        };
        assert!(matches!(header.encode(), Err(ZipError::FieldTooLong { .. })));
        let eocd = EndOfCentralDirectory::new(1, 2, 3, &[b'x'; 65_536]);
        assert!(matches!(eocd.encode(), Err(ZipError::FieldTooLong { .. })));

        let longest = LocalFileHeader::streamed(&long[..65_535], 0, 0, 0);
        assert_eq!(longest.encode().unwrap().len(), LOCAL_HEADER_LEN + 65_535);
    }

    #[test]
    fn zip64_records_roundtrip() {
        let record = Zip64EndOfCentralDirectory {
            entries: 1 << 20,
            cd_size: 99,
            cd_offset: 1 << 40,
        };
        let bytes = record.encode();
        assert_eq!(bytes.len(), ZIP64_EOCD_LEN);
        assert_eq!(Zip64EndOfCentralDirectory::decode(&bytes, 0).unwrap(), record);

        let locator = Zip64Locator { eocd64_offset: 77 };
        let bytes = locator.encode();
        assert_eq!(bytes.len(), ZIP64_LOCATOR_LEN);
        assert_eq!(Zip64Locator::decode(&bytes, 0), Some(locator));
        assert_eq!(Zip64Locator::decode(&[0; ZIP64_LOCATOR_LEN], 0), None);
    }
}
