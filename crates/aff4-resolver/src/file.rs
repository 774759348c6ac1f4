use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use aff4_types::Urn;
use tracing::debug;

use crate::error::{Aff4Error, Aff4Result};
use crate::object::{OpenMode, Stream};
use crate::resolver::Resolver;

/// A local file addressed by a `file://` URN.
#[derive(Debug)]
pub struct RawFile {
    urn: Urn,
    path: PathBuf,
    file: File,
    writable: bool,
    size: u64,
    position: u64,
    read_calls: u64,
}

impl RawFile {
    /// Open the file behind `urn`. Write mode creates it when missing.
    pub fn open(urn: &Urn, mode: OpenMode) -> Aff4Result<Self> {
        let path = urn
            .to_path()
            .ok_or_else(|| Aff4Error::InvalidArgument(format!("{urn} is not a file URN")))?;
        let file = match mode {
            OpenMode::Read => File::open(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Aff4Error::not_found(urn, "file"),
                _ => Aff4Error::Io(e),
            })?,
            OpenMode::Write => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?,
        };
        let size = file.metadata()?.len();
        debug!(urn = %urn, size, ?mode, "opened file");
        Ok(Self {
            urn: urn.clone(),
            path,
            file,
            writable: mode == OpenMode::Write,
            size,
            position: 0,
            read_calls: 0,
        })
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Reopen read-write if currently read-only.
    pub fn make_writable(&mut self) -> Aff4Result<()> {
        if !self.writable {
            self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            self.writable = true;
        }
        Ok(())
    }

    /// Number of reads served from disk; lets callers check that cached
    /// objects are not re-read.
    pub fn read_calls(&self) -> u64 {
        self.read_calls
    }

    /// Read up to `buf.len()` bytes at `offset`; short only at end of file.
    pub fn pread(&mut self, offset: u64, buf: &mut [u8]) -> Aff4Result<usize> {
        self.read_calls += 1;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    pub fn pwrite(&mut self, offset: u64, data: &[u8]) -> Aff4Result<()> {
        if !self.writable {
            return Err(Aff4Error::InvalidArgument(format!("{} is read-only", self.urn)));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.size = self.size.max(offset + data.len() as u64);
        Ok(())
    }

    /// Cut or extend the file to `len` bytes.
    pub fn truncate(&mut self, len: u64) -> Aff4Result<()> {
        self.file.set_len(len)?;
        self.size = len;
        Ok(())
    }

    pub fn sync(&mut self) -> Aff4Result<()> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

impl Stream for RawFile {
    fn size(&self, _: &Resolver) -> Aff4Result<u64> {
        Ok(self.size)
    }

    fn read_at(&mut self, _: &Resolver, offset: u64, buf: &mut [u8]) -> Aff4Result<usize> {
        self.pread(offset, buf)
    }

    fn write(&mut self, _: &Resolver, data: &[u8]) -> Aff4Result<usize> {
        let end = self.size;
        self.pwrite(end, data)?;
        Ok(data.len())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
    }
}

/// `Read + Seek` view of a [`RawFile`] for the ZIP directory parser.
pub(crate) struct FileCursor<'a> {
    file: &'a mut RawFile,
    position: u64,
}

impl<'a> FileCursor<'a> {
    pub fn new(file: &'a mut RawFile) -> Self {
        Self { file, position: 0 }
    }
}

impl Read for FileCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self
            .file
            .pread(self.position, buf)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for FileCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.file.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        self.position = target.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "seek before start")
        })?;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let urn = Urn::from_path(&dir.path().join("raw.bin"));
        let mut file = RawFile::open(&urn, OpenMode::Write).unwrap();
        file.pwrite(0, b"hello world").unwrap();
        assert_eq!(file.len(), 11);

        let mut buf = [0u8; 32];
        assert_eq!(file.pread(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(file.read_calls(), 1);

        file.truncate(5).unwrap();
        assert_eq!(file.pread(0, &mut buf).unwrap(), 5);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let urn = Urn::from_path(&dir.path().join("absent"));
        assert!(RawFile::open(&urn, OpenMode::Read).unwrap_err().is_not_found());
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.bin");
        std::fs::write(&path, b"x").unwrap();
        let mut file = RawFile::open(&Urn::from_path(&path), OpenMode::Read).unwrap();
        assert!(file.pwrite(0, b"y").is_err());
        file.make_writable().unwrap();
        file.pwrite(1, b"y").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"xy");
    }

    #[test]
    fn cursor_seeks_from_end() {
        let dir = tempfile::tempdir().unwrap();
        let urn = Urn::from_path(&dir.path().join("c.bin"));
        let mut file = RawFile::open(&urn, OpenMode::Write).unwrap();
        file.pwrite(0, b"0123456789").unwrap();
        let mut cursor = FileCursor::new(&mut file);
        assert_eq!(cursor.seek(SeekFrom::End(-3)).unwrap(), 7);
        let mut out = String::new();
        cursor.read_to_string(&mut out).unwrap();
        assert_eq!(out, "789");
    }
}
