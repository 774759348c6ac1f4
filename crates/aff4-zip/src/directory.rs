use std::io::{Read, Seek, SeekFrom, Write};

use chrono::{DateTime, Utc};

use crate::dostime::{from_dos, to_dos};
use crate::entry::{MemberEntry, ZipCompression};
use crate::error::{ZipError, ZipResult};
use crate::escape::{escape_name, unescape_name};
use crate::header::{
    CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader, Zip64EndOfCentralDirectory,
    Zip64Locator, EOCD_LEN, EOCD_SIG, FLAG_DATA_DESCRIPTOR, FLAG_UTF8, LOCAL_HEADER_LEN,
    ZIP64_EOCD_LEN, ZIP64_LOCATOR_LEN,
};

/// How far from the end the EOCD can start: maximal comment plus record.
pub const MAX_TAIL: u64 = u16::MAX as u64 + EOCD_LEN as u64;

/// A parsed central directory.
#[derive(Clone, Debug)]
pub struct Directory {
    pub entries: Vec<MemberEntry>,
    /// The EOCD comment; AFF4 keeps the volume URN here.
    pub comment: String,
    /// Where the central directory starts. New members are appended here.
    pub cd_offset: u64,
}

fn read_at<R: Read + Seek>(reader: &mut R, offset: u64, len: usize) -> ZipResult<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => ZipError::Corrupt {
            offset,
            reason: format!("archive truncated reading {len} bytes"),
        },
        _ => ZipError::Io(e),
    })?;
    Ok(buf)
}

/// Position of the EOCD record in `tail`: scanning backward, the first
/// signature whose comment length exactly reaches the end.
pub fn find_eocd(tail: &[u8]) -> Option<usize> {
    if tail.len() < EOCD_LEN {
        return None;
    }
    let sig = EOCD_SIG.to_le_bytes();
    (0..=tail.len() - EOCD_LEN).rev().find(|&pos| {
        tail[pos..pos + 4] == sig && {
            let comment_len = u16::from_le_bytes([tail[pos + 20], tail[pos + 21]]) as usize;
            pos + EOCD_LEN + comment_len == tail.len()
        }
    })
}

/// Parse the central directory of an archive.
///
/// Each record is cross-checked against its local file header, which also
/// gives the true data offset.
pub fn read_directory<R: Read + Seek>(reader: &mut R) -> ZipResult<Directory> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let tail_len = file_len.min(MAX_TAIL);
    let tail_start = file_len - tail_len;
    let tail = read_at(reader, tail_start, tail_len as usize)?;

    let eocd_pos = find_eocd(&tail).ok_or(ZipError::MissingDirectory)?;
    let eocd_offset = tail_start + eocd_pos as u64;
    let eocd = EndOfCentralDirectory::decode(&tail[eocd_pos..], eocd_offset)?;

    let (count, cd_size, cd_offset) = match read_zip64(reader, eocd_offset)? {
        Some(z) => (z.entries, z.cd_size, z.cd_offset),
        None => (eocd.entries as u64, eocd.cd_size as u64, eocd.cd_offset as u64),
    };
    if cd_offset.checked_add(cd_size).map_or(true, |end| end > eocd_offset) {
        return Err(ZipError::Corrupt {
            offset: eocd_offset,
            reason: format!("central directory {cd_offset}+{cd_size} overruns the archive"),
        });
    }

    let cd = read_at(reader, cd_offset, cd_size as usize)?;
    let mut entries = Vec::with_capacity(count.min(1 << 16) as usize);
    let mut pos = 0usize;
    for _ in 0..count {
        let (header, len) = CentralDirectoryHeader::decode(&cd[pos..], cd_offset + pos as u64)?;
        pos += len;
        entries.push(resolve_entry(reader, header)?);
    }

    tracing::debug!(members = entries.len(), cd_offset, "parsed central directory");
    Ok(Directory {
        entries,
        comment: String::from_utf8_lossy(&eocd.comment).into_owned(),
        cd_offset,
    })
}

fn read_zip64<R: Read + Seek>(
    reader: &mut R,
    eocd_offset: u64,
) -> ZipResult<Option<Zip64EndOfCentralDirectory>> {
    let Some(locator_offset) = eocd_offset.checked_sub(ZIP64_LOCATOR_LEN as u64) else {
        return Ok(None);
    };
    let bytes = read_at(reader, locator_offset, ZIP64_LOCATOR_LEN)?;
    let Some(locator) = Zip64Locator::decode(&bytes, locator_offset) else {
        return Ok(None);
    };
    let record = read_at(reader, locator.eocd64_offset, ZIP64_EOCD_LEN)?;
    Zip64EndOfCentralDirectory::decode(&record, locator.eocd64_offset).map(Some)
}

fn resolve_entry<R: Read + Seek>(
    reader: &mut R,
    header: CentralDirectoryHeader,
) -> ZipResult<MemberEntry> {
    let fixed = read_at(reader, header.header_offset, LOCAL_HEADER_LEN)?;
    let (_, name_len, extra_len) = LocalFileHeader::decode_fixed(&fixed, header.header_offset)?;
    let escaped = String::from_utf8_lossy(&header.name);
    Ok(MemberEntry {
        name: unescape_name(&escaped),
        compression: ZipCompression::from_method(header.method)?,
        crc32: header.crc32,
        compressed_size: header.compressed_size,
        uncompressed_size: header.uncompressed_size,
        header_offset: header.header_offset,
        data_offset: header.header_offset + (LOCAL_HEADER_LEN + name_len + extra_len) as u64,
        modified: from_dos(header.dos_time, header.dos_date).unwrap_or_else(DateTime::<Utc>::default),
    })
}

/// Write the central directory at `cd_offset` followed by the EOCD whose
/// comment is `comment`. Zip64 records are added when any count or offset
/// overflows. Returns the number of bytes written.
pub fn write_directory<W: Write>(
    writer: &mut W,
    cd_offset: u64,
    entries: &[MemberEntry],
    comment: &str,
) -> ZipResult<u64> {
    let mut out = Vec::new();
    for entry in entries {
        let (dos_time, dos_date) = to_dos(entry.modified);
        out.extend(
            CentralDirectoryHeader {
                flags: FLAG_DATA_DESCRIPTOR | FLAG_UTF8,
                method: entry.compression.method(),
                dos_time,
                dos_date,
                crc32: entry.crc32,
                compressed_size: entry.compressed_size,
                uncompressed_size: entry.uncompressed_size,
                header_offset: entry.header_offset,
                name: escape_name(&entry.name).into_bytes(),
                comment: Vec::new(),
            }
            .encode()?,
        );
    }
    let cd_size = out.len() as u64;

    let eocd = EndOfCentralDirectory::new(entries.len() as u64, cd_size, cd_offset, comment.as_bytes());
    if eocd.is_saturated() {
        let eocd64_offset = cd_offset + cd_size;
        out.extend(
            Zip64EndOfCentralDirectory {
                entries: entries.len() as u64,
                cd_size,
                cd_offset,
            }
            .encode(),
        );
        out.extend(Zip64Locator { eocd64_offset }.encode());
    }
    out.extend(eocd.encode()?);

    writer.write_all(&out)?;
    tracing::debug!(members = entries.len(), cd_offset, zip64 = eocd.is_saturated(), "wrote central directory");
    Ok(out.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{read_member, MemberEncoder};
    use std::io::Cursor;

    fn build_archive(members: &[(&str, ZipCompression, &[u8])], comment: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut entries = Vec::new();
        for (name, compression, data) in members {
            let (mut encoder, header) =
                MemberEncoder::begin(name, *compression, out.len() as u64, Utc::now()).unwrap();
            out.extend(header);
            out.extend(encoder.encode(data).unwrap());
            let (entry, tail) = encoder.finish().unwrap();
            out.extend(tail);
            entries.push(entry);
        }
        let cd_offset = out.len() as u64;
        write_directory(&mut out, cd_offset, &entries, comment).unwrap();
        out
    }

    #[test]
    fn archive_roundtrip() {
        let bytes = build_archive(
            &[
                ("information.turtle", ZipCompression::Deflate, b"aff4 aff4 aff4 aff4"),
                ("aff4://img/00000000", ZipCompression::Stored, &[1, 2, 3]),
                ("empty", ZipCompression::Stored, b""),
            ],
            "aff4://volume",
        );
        let mut cursor = Cursor::new(bytes);
        let dir = read_directory(&mut cursor).unwrap();
        assert_eq!(dir.comment, "aff4://volume");
        assert_eq!(dir.entries.len(), 3);
        assert_eq!(dir.entries[1].name, "aff4://img/00000000");
        assert_eq!(read_member(&mut cursor, &dir.entries[0]).unwrap(), b"aff4 aff4 aff4 aff4");
        assert_eq!(read_member(&mut cursor, &dir.entries[1]).unwrap(), vec![1, 2, 3]);
        assert!(read_member(&mut cursor, &dir.entries[2]).unwrap().is_empty());
    }

    #[test]
    fn cd_offset_points_past_members() {
        let bytes = build_archive(&[("a", ZipCompression::Stored, b"xyz")], "");
        let dir = read_directory(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(dir.cd_offset, 31 + 3 + 16);
    }

    #[test]
    fn eocd_scan_skips_signature_inside_comment() {
        let mut fake = "x".repeat(4).into_bytes();
        fake.extend_from_slice(&EOCD_SIG.to_le_bytes());
        let comment = String::from_utf8_lossy(&fake).into_owned();
        let bytes = build_archive(&[("a", ZipCompression::Stored, b"1")], &comment);
        let dir = read_directory(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(dir.entries.len(), 1);
        assert_eq!(dir.comment, comment);
    }

    #[test]
    fn missing_eocd() {
        let err = read_directory(&mut Cursor::new(vec![0u8; 100])).unwrap_err();
        assert!(matches!(err, ZipError::MissingDirectory));
        assert!(read_directory(&mut Cursor::new(Vec::new())).unwrap_err().is_corrupt());
    }

    #[test]
    fn bad_central_record_is_corrupt() {
        let mut bytes = build_archive(&[("a", ZipCompression::Stored, b"1")], "c");
        let dir = read_directory(&mut Cursor::new(bytes.clone())).unwrap();
        bytes[dir.cd_offset as usize] = 0;
        let err = read_directory(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn bad_local_header_is_corrupt() {
        let mut bytes = build_archive(&[("a", ZipCompression::Stored, b"1")], "");
        bytes[0] = b'X';
        let err = read_directory(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ZipError::InvalidMagic { offset: 0, .. }));
    }

    #[test]
    fn many_entries_use_zip64() {
        let (mut encoder, mut out) =
            MemberEncoder::begin("shared", ZipCompression::Stored, 0, Utc::now()).unwrap();
        out.extend(encoder.encode(b"payload").unwrap());
        let (entry, tail) = encoder.finish().unwrap();
        out.extend(tail);

        let entries: Vec<MemberEntry> = (0..70_000)
            .map(|i| MemberEntry {
                name: format!("m{i}"),
                ..entry.clone()
            })
            .collect();
        let cd_offset = out.len() as u64;
        write_directory(&mut out, cd_offset, &entries, "aff4://many").unwrap();

        let mut cursor = Cursor::new(out);
        let dir = read_directory(&mut cursor).unwrap();
        assert_eq!(dir.entries.len(), 70_000);
        assert_eq!(dir.entries[69_999].name, "m69999");
        assert_eq!(read_member(&mut cursor, &dir.entries[12]).unwrap(), b"payload");
    }

    #[test]
    fn disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.zip");
        std::fs::write(
            &path,
            build_archive(&[("properties", ZipCompression::Deflate, b"x y=z\n")], "aff4://disk"),
        )
        .unwrap();
        let mut file = std::fs::File::open(&path).unwrap();
        let parsed = read_directory(&mut file).unwrap();
        assert_eq!(parsed.comment, "aff4://disk");
        assert_eq!(read_member(&mut file, &parsed.entries[0]).unwrap(), b"x y=z\n");
    }
}
