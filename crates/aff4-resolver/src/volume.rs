//! ZIP-backed volumes.
//!
//! A volume owns a backing file and the directory of members inside it.
//! Members are appended at the watermark as streamed ZIP entries (sizes in
//! a trailing data descriptor); the central directory is rebuilt at the
//! watermark when the volume closes. The EOCD comment carries the volume
//! URN so that a copied or renamed file still resolves to the same
//! volume.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use aff4_store::TripleStore;
use aff4_types::predicates::{
    self, CONTAINS, DIRECTORY_OFFSET, STORED, TYPE, WRITE_LOCK, ZIP_COMPRESSED_SIZE,
    ZIP_COMPRESSION, ZIP_CRC, ZIP_DATA_OFFSET, ZIP_HEADER_OFFSET,
};
use aff4_types::{Urn, Value};
use aff4_zip::{decode_member, read_directory, write_directory, MemberEncoder, MemberEntry, ZipCompression};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Aff4Error, Aff4Result};
use crate::file::FileCursor;
use crate::identity;
use crate::lock::{LockMode, LockOwner};
use crate::object::OpenMode;
use crate::resolver::{volume_mut, Resolver};

/// Name suffix of members holding exported attributes.
pub const PROPERTIES: &str = "properties";

struct ActiveMember {
    urn: Urn,
    name: String,
    encoder: MemberEncoder,
}

/// A ZIP volume.
pub struct ZipVolume {
    urn: Urn,
    backing: Urn,
    writable: bool,
    /// Members by ZIP name; a rewritten member replaces its entry.
    members: BTreeMap<String, MemberEntry>,
    /// Where the next member starts, and where the directory is written.
    watermark: u64,
    dirty: bool,
    active: Option<ActiveMember>,
    /// Holds the backing file's write lock; close may run on any thread.
    lock_owner: LockOwner,
}

impl ZipVolume {
    /// A new volume over an empty backing file named by `aff4:stored`.
    pub(crate) fn create(resolver: &Resolver, urn: &Urn) -> Aff4Result<Self> {
        let backing = resolver.store().resolve_urn(urn, STORED)?;
        let lock_owner = LockOwner::holder();
        resolver.lock_as(&backing, LockMode::Write, lock_owner)?;
        let prepared = resolver.with_object(&backing, OpenMode::Write, |object| {
            match object.as_file_mut() {
                Some(file) => file.truncate(0),
                None => Err(Aff4Error::InvalidArgument(format!("{backing} is not a file"))),
            }
        });
        if let Err(e) = prepared {
            release_lock(resolver, &backing, lock_owner);
            return Err(e);
        }
        resolver.set(urn, DIRECTORY_OFFSET, 0u64)?;
        info!(volume = %urn, file = %backing, "created volume");
        Ok(Self {
            urn: urn.clone(),
            backing,
            writable: true,
            members: BTreeMap::new(),
            watermark: 0,
            dirty: true,
            active: None,
            lock_owner,
        })
    }

    /// Reopen a known volume from its `aff4:stored` file.
    pub(crate) fn open(resolver: &Resolver, urn: &Urn, mode: OpenMode) -> Aff4Result<Self> {
        let backing = resolver.store().resolve_urn(urn, STORED)?;
        Self::load(resolver, &backing, mode)
    }

    /// Parse the volume stored in `backing`.
    pub(crate) fn load(resolver: &Resolver, backing: &Urn, mode: OpenMode) -> Aff4Result<Self> {
        let lock_owner = LockOwner::holder();
        if mode == OpenMode::Write {
            resolver.lock_as(backing, LockMode::Write, lock_owner)?;
        }
        let loaded = Self::load_locked(resolver, backing, mode, lock_owner);
        if loaded.is_err() && mode == OpenMode::Write {
            release_lock(resolver, backing, lock_owner);
        }
        loaded
    }

    fn load_locked(
        resolver: &Resolver,
        backing: &Urn,
        mode: OpenMode,
        lock_owner: LockOwner,
    ) -> Aff4Result<Self> {
        let directory = resolver.with_object(backing, mode, |object| match object.as_file_mut() {
            Some(file) => Ok(read_directory(&mut FileCursor::new(file))?),
            None => Err(Aff4Error::InvalidArgument(format!("{backing} is not a file"))),
        })?;

        let comment = directory.comment.trim();
        let urn = if comment.contains("://") {
            Urn::from(comment)
        } else {
            backing.clone()
        };
        let mut volume = Self {
            urn: urn.clone(),
            backing: backing.clone(),
            writable: mode == OpenMode::Write,
            members: BTreeMap::new(),
            watermark: directory.cd_offset,
            dirty: false,
            active: None,
            lock_owner,
        };
        for entry in directory.entries {
            volume.record_member(resolver, entry)?;
        }

        let properties: Vec<MemberEntry> = volume
            .members
            .values()
            .filter(|e| e.name.ends_with(PROPERTIES))
            .cloned()
            .collect();
        for entry in properties {
            let member = volume.member_urn(&entry.name);
            let data = volume.read_entry(resolver, &entry)?;
            let text = String::from_utf8_lossy(&data);
            let count = resolver.parse(&member.parent(), &text)?;
            debug!(volume = %urn, member = %member, count, "parsed properties");
        }

        // Properties may name the file the volume was written to; the file
        // it was read from wins.
        resolver.set(&urn, TYPE, predicates::TYPE_ZIP_VOLUME)?;
        resolver.set(&urn, STORED, backing)?;
        resolver.set(&urn, DIRECTORY_OFFSET, directory.cd_offset)?;
        volume.seal_attested(resolver);
        Ok(volume)
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn backing(&self) -> &Urn {
        &self.backing
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &MemberEntry> {
        self.members.values()
    }

    /// ZIP name of `member`: relative below the volume, absolute otherwise.
    pub fn member_name(&self, member: &Urn) -> String {
        member
            .relative_to(&self.urn)
            .map(str::to_string)
            .unwrap_or_else(|| member.to_string())
    }

    pub fn member_urn(&self, name: &str) -> Urn {
        self.urn.resolve(name)
    }

    fn record_member(&mut self, resolver: &Resolver, entry: MemberEntry) -> Aff4Result<()> {
        let member = self.member_urn(&entry.name);
        let store = resolver.store();
        store.add_unique(&self.urn, CONTAINS, Value::Urn(member.clone()))?;
        store.set(&member, STORED, Value::Urn(self.urn.clone()))?;
        store.set(&member, ZIP_COMPRESSION, Value::Int32(entry.compression.method() as i32))?;
        store.set(&member, ZIP_COMPRESSED_SIZE, Value::from(entry.compressed_size))?;
        store.set(&member, ZIP_CRC, Value::Int64(entry.crc32 as i64))?;
        store.set(&member, ZIP_HEADER_OFFSET, Value::from(entry.header_offset))?;
        store.set(&member, ZIP_DATA_OFFSET, Value::from(entry.data_offset))?;
        store.set(&member, predicates::SIZE, Value::from(entry.uncompressed_size))?;
        self.members.insert(entry.name.clone(), entry);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Reading
    // ---------------------------------------------------------------

    fn entry_of(&self, member: &Urn) -> Aff4Result<&MemberEntry> {
        self.members
            .get(&self.member_name(member))
            .ok_or_else(|| Aff4Error::not_found(member, format!("member of {}", self.urn)))
    }

    fn read_backing(&self, resolver: &Resolver, offset: u64, len: u64) -> Aff4Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        let n = resolver.with_object(&self.backing, OpenMode::Read, |object| {
            match object.as_file_mut() {
                Some(file) => file.pread(offset, &mut buf),
                None => Err(Aff4Error::InvalidArgument(format!("{} is not a file", self.backing))),
            }
        })?;
        if n < buf.len() {
            return Err(Aff4Error::CorruptArchive(format!(
                "{} truncated: wanted {len} bytes at {offset}, got {n}",
                self.backing
            )));
        }
        Ok(buf)
    }

    fn read_entry(&self, resolver: &Resolver, entry: &MemberEntry) -> Aff4Result<Vec<u8>> {
        let raw = self.read_backing(resolver, entry.data_offset, entry.compressed_size)?;
        Ok(decode_member(entry, &raw)?)
    }

    /// The decompressed content of a member, CRC-checked.
    pub fn read_member(&self, resolver: &Resolver, member: &Urn) -> Aff4Result<Vec<u8>> {
        let entry = self.entry_of(member)?;
        self.read_entry(resolver, entry)
    }

    /// A byte range of a stored member read in place. `None` when the
    /// member is compressed and must be decoded whole.
    pub fn read_stored_range(
        &self,
        resolver: &Resolver,
        member: &Urn,
        range: Range<u64>,
    ) -> Aff4Result<Option<Vec<u8>>> {
        let entry = self.entry_of(member)?;
        if entry.compression != ZipCompression::Stored {
            return Ok(None);
        }
        if range.start > range.end || range.end > entry.uncompressed_size {
            return Err(Aff4Error::not_found(member, format!("bytes {range:?}")));
        }
        self.read_backing(resolver, entry.data_offset + range.start, range.end - range.start)
            .map(Some)
    }

    // ---------------------------------------------------------------
    // Writing
    // ---------------------------------------------------------------

    fn ensure_writable(&self) -> Aff4Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Aff4Error::InvalidArgument(format!("volume {} is read-only", self.urn)))
        }
    }

    fn append(&mut self, resolver: &Resolver, bytes: &[u8]) -> Aff4Result<()> {
        let offset = self.watermark;
        resolver.with_object(&self.backing, OpenMode::Write, |object| match object.as_file_mut() {
            Some(file) => file.pwrite(offset, bytes),
            None => Err(Aff4Error::InvalidArgument(format!("{} is not a file", self.backing))),
        })?;
        self.watermark += bytes.len() as u64;
        Ok(())
    }

    /// Start a streamed member. Fails with `ConcurrentWrite` while another
    /// member is being written.
    pub fn begin_member(
        &mut self,
        resolver: &Resolver,
        member: &Urn,
        compression: ZipCompression,
    ) -> Aff4Result<()> {
        self.ensure_writable()?;
        if let Some(active) = &self.active {
            return Err(Aff4Error::ConcurrentWrite {
                volume: self.urn.clone(),
                holder: active.urn.clone(),
            });
        }
        let name = self.member_name(member);
        let (encoder, header) = MemberEncoder::begin(&name, compression, self.watermark, Utc::now())?;
        self.append(resolver, &header)?;
        resolver.set(&self.urn, WRITE_LOCK, member)?;
        self.active = Some(ActiveMember {
            urn: member.clone(),
            name,
            encoder,
        });
        self.dirty = true;
        Ok(())
    }

    fn active_for(&mut self, member: &Urn) -> Aff4Result<&mut ActiveMember> {
        match &self.active {
            Some(active) if &active.urn == member => Ok(self.active.as_mut().expect("checked above")),
            Some(active) => Err(Aff4Error::ConcurrentWrite {
                volume: self.urn.clone(),
                holder: active.urn.clone(),
            }),
            None => Err(Aff4Error::InvalidArgument(format!(
                "{member} is not being written in {}",
                self.urn
            ))),
        }
    }

    pub fn append_member(&mut self, resolver: &Resolver, member: &Urn, data: &[u8]) -> Aff4Result<()> {
        let bytes = self.active_for(member)?.encoder.encode(data)?;
        self.append(resolver, &bytes)
    }

    pub fn finish_member(&mut self, resolver: &Resolver, member: &Urn) -> Aff4Result<MemberEntry> {
        self.active_for(member)?;
        let Some(active) = self.active.take() else {
            return Err(Aff4Error::InvalidArgument(format!("{member} is not being written")));
        };
        resolver.delete(&self.urn, WRITE_LOCK);
        let (entry, tail) = active.encoder.finish()?;
        self.append(resolver, &tail)?;
        debug!(
            volume = %self.urn,
            member = %active.name,
            size = entry.uncompressed_size,
            compressed = entry.compressed_size,
            "member written"
        );
        self.record_member(resolver, entry.clone())?;
        resolver.forget_member(member);
        Ok(entry)
    }

    /// Write a whole member.
    pub fn write_member(
        &mut self,
        resolver: &Resolver,
        member: &Urn,
        data: &[u8],
        compression: ZipCompression,
    ) -> Aff4Result<MemberEntry> {
        self.begin_member(resolver, member, compression)?;
        self.append_member(resolver, member, data)?;
        self.finish_member(resolver, member)
    }

    /// Write metadata and the central directory, then release the file.
    pub fn close(&mut self, resolver: &Resolver) -> Aff4Result<()> {
        if !self.writable {
            return Ok(());
        }
        if let Some(active) = &self.active {
            warn!(volume = %self.urn, member = %active.urn, "finishing member left open at close");
            let member = active.urn.clone();
            self.finish_member(resolver, &member)?;
        }
        if self.dirty {
            self.write_statements(resolver)?;
            self.write_properties(resolver)?;
            self.write_directory(resolver)?;
        }
        self.writable = false;
        self.dirty = false;
        resolver.close_urn(&self.backing)?;
        release_lock(resolver, &self.backing, self.lock_owner);
        info!(volume = %self.urn, members = self.members.len(), "volume closed");
        Ok(())
    }

    fn write_statements(&mut self, resolver: &Resolver) -> Aff4Result<()> {
        for identity in resolver.identities() {
            let statement = resolver.with_object(&identity, OpenMode::Read, |object| {
                match object.as_identity() {
                    Some(id) => id.statement(resolver, &self.urn),
                    None => Ok(None),
                }
            })?;
            let Some(statement) = statement else {
                continue;
            };
            self.write_member(resolver, &statement.urn, statement.text.as_bytes(), ZipCompression::Stored)?;
            self.write_member(
                resolver,
                &identity::signature_urn(&statement.urn),
                &statement.signature,
                ZipCompression::Stored,
            )?;
        }
        Ok(())
    }

    /// Export the volume and everything stored in it, except its members,
    /// which the directory describes.
    fn write_properties(&mut self, resolver: &Resolver) -> Aff4Result<()> {
        let store = resolver.store();
        let members = store.resolve_urns(&self.urn, CONTAINS);
        let mut text = store.export(&self.urn);
        for subject in store.subjects() {
            if subject == self.urn || members.contains(&subject) {
                continue;
            }
            if store.resolve_urns(&subject, STORED).contains(&self.urn) {
                text.push_str(&store.export(&subject));
            }
        }
        let member = self.urn.join(PROPERTIES);
        self.write_member(resolver, &member, text.as_bytes(), ZipCompression::Deflate)?;
        Ok(())
    }

    fn write_directory(&mut self, resolver: &Resolver) -> Aff4Result<()> {
        let mut entries: Vec<MemberEntry> = self.members.values().cloned().collect();
        entries.sort_by_key(|e| e.header_offset);
        let mut bytes = Vec::new();
        write_directory(&mut bytes, self.watermark, &entries, self.urn.as_str())?;
        let cd_offset = self.watermark;
        let end = cd_offset + bytes.len() as u64;
        resolver.with_object(&self.backing, OpenMode::Write, |object| match object.as_file_mut() {
            Some(file) => {
                file.pwrite(cd_offset, &bytes)?;
                // Appending may leave an older, longer directory behind.
                file.truncate(end)?;
                file.sync()
            }
            None => Err(Aff4Error::InvalidArgument(format!("{} is not a file", self.backing))),
        })?;
        resolver.set(&self.urn, DIRECTORY_OFFSET, cd_offset)?;
        debug!(volume = %self.urn, cd_offset, entries = entries.len(), "central directory written");
        Ok(())
    }

    /// Verify identity statements stored here and seal what they attest.
    fn seal_attested(&self, resolver: &Resolver) {
        let store = resolver.store();
        for t in store.query(None, Some(TYPE), Some(predicates::TYPE_IDENTITY)) {
            let owner = t.subject;
            for statement in store.resolve_urns(&owner, predicates::STATEMENT) {
                let Ok(entry) = self.entry_of(&statement) else {
                    continue;
                };
                let verified = identity::certificate_of(resolver, &owner).and_then(|cert| {
                    let text = self.read_entry(resolver, entry)?;
                    let sig = self.read_member(resolver, &identity::signature_urn(&statement))?;
                    identity::verify_statement(&cert, &text, &sig)
                });
                match verified {
                    Ok(attested) => {
                        for (subject, hash) in &attested {
                            identity::seal_hash(resolver, subject, hash);
                        }
                        debug!(statement = %statement, count = attested.len(), "statement verified");
                    }
                    Err(e) => warn!(statement = %statement, error = %e, "statement rejected"),
                }
            }
        }
    }
}

impl fmt::Debug for ZipVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipVolume")
            .field("urn", &self.urn)
            .field("backing", &self.backing)
            .field("writable", &self.writable)
            .field("members", &self.members.len())
            .field("watermark", &self.watermark)
            .field("active", &self.active.as_ref().map(|a| &a.urn))
            .finish()
    }
}

fn release_lock(resolver: &Resolver, backing: &Urn, owner: LockOwner) {
    if !resolver.unlock_as(backing, LockMode::Write, owner) {
        warn!(file = %backing, %owner, "write lock was not held at release");
    }
}

/// A member being streamed into a volume.
///
/// Holds the volume's write lock; [`finish`](Self::finish) (or dropping
/// the writer) completes the member and releases it.
pub struct MemberWriter<'a> {
    resolver: &'a Resolver,
    volume: Urn,
    member: Urn,
    finished: bool,
}

impl<'a> MemberWriter<'a> {
    pub(crate) fn new(resolver: &'a Resolver, volume: Urn, member: Urn) -> Self {
        Self {
            resolver,
            volume,
            member,
            finished: false,
        }
    }

    pub fn member(&self) -> &Urn {
        &self.member
    }

    pub fn write(&mut self, data: &[u8]) -> Aff4Result<()> {
        let resolver = self.resolver;
        let member = &self.member;
        resolver.with_object(&self.volume, OpenMode::Write, |object| {
            volume_mut(object)?.append_member(resolver, member, data)
        })
    }

    pub fn finish(mut self) -> Aff4Result<MemberEntry> {
        self.finished = true;
        self.finish_inner()
    }

    fn finish_inner(&self) -> Aff4Result<MemberEntry> {
        let resolver = self.resolver;
        let member = &self.member;
        resolver.with_object(&self.volume, OpenMode::Write, |object| {
            volume_mut(object)?.finish_member(resolver, member)
        })
    }
}

impl Drop for MemberWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish_inner() {
                warn!(member = %self.member, error = %e, "failed to finish dropped member writer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;

    fn resolver() -> Resolver {
        Resolver::new(ResolverConfig {
            lock_files: false,
            ..ResolverConfig::default()
        })
    }

    #[test]
    fn volume_closed_on_another_thread_can_be_recreated() {
        use std::sync::{mpsc, Arc};
        use std::thread;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.aff4");
        let r = Arc::new(Resolver::new(ResolverConfig {
            lock_files: true,
            ..ResolverConfig::default()
        }));

        let (r2, p2) = (Arc::clone(&r), path.clone());
        thread::spawn(move || r2.create_volume(&p2).map(|_| ()))
            .join()
            .unwrap()
            .unwrap();
        r.close_all().unwrap();
        assert!(!r.is_locked(&Urn::from_path(&path), LockMode::Write));
        assert!(!dir.path().join("v.aff4.lock").exists());

        let (tx, rx) = mpsc::channel();
        let (r3, p3) = (Arc::clone(&r), path.clone());
        thread::spawn(move || {
            let created = r3.create_volume(&p3).map(|v| v.urn().clone());
            let _ = tx.send(created);
        });
        let created = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("recreating the volume blocked");
        assert!(created.is_ok());
        r.close_all().unwrap();
    }

    #[test]
    fn member_roundtrip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.aff4");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 97) as u8).collect();

        let volume_urn = {
            let r = resolver();
            let volume = r.create_volume(&path).unwrap();
            let urn = volume.urn().clone();
            r.write_member(&urn, &urn.join("raw"), &data, ZipCompression::Stored)
                .unwrap();
            r.write_member(&urn, &urn.join("packed"), &data, ZipCompression::Deflate)
                .unwrap();
            r.close(&volume).unwrap();
            urn
        };

        let r = resolver();
        let volume = r.open_volume(&path, OpenMode::Read).unwrap();
        assert_eq!(volume.urn(), &volume_urn);
        assert_eq!(&*r.read_member(&volume_urn.join("raw")).unwrap(), &data[..]);
        assert_eq!(&*r.read_member(&volume_urn.join("packed")).unwrap(), &data[..]);
        assert_eq!(
            r.read_member_range(&volume_urn.join("raw"), 10..20).unwrap(),
            &data[10..20]
        );
        assert!(r.member_exists(&volume_urn.join("packed")));
        assert!(!r.member_exists(&volume_urn.join("absent")));
        assert!(r.read_member(&volume_urn.join("absent")).unwrap_err().is_not_found());
    }

    #[test]
    fn second_writer_waits_for_first() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver();
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        let v = volume.urn().clone();

        let mut first = r.begin_member(&v, &v.join("a"), ZipCompression::Stored).unwrap();
        first.write(b"part one ").unwrap();
        assert!(matches!(
            r.write_member(&v, &v.join("b"), b"x", ZipCompression::Stored),
            Err(Aff4Error::ConcurrentWrite { .. })
        ));
        first.write(b"part two").unwrap();
        first.finish().unwrap();

        r.write_member(&v, &v.join("b"), b"x", ZipCompression::Stored)
            .unwrap();
        assert_eq!(&*r.read_member(&v.join("a")).unwrap(), b"part one part two");
        r.close(&volume).unwrap();
    }

    #[test]
    fn properties_are_reloaded_and_volatile_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.aff4");
        let stream = Urn::from("aff4://stream");
        {
            let r = resolver();
            let volume = r.create_volume(&path).unwrap();
            r.set(&stream, STORED, volume.urn()).unwrap();
            r.set(&stream, predicates::SIZE, 42u64).unwrap();
            r.close(&volume).unwrap();
        }
        let r = resolver();
        let volume = r.open_volume(&path, OpenMode::Read).unwrap();
        assert_eq!(r.store().resolve_u64(&stream, predicates::SIZE).unwrap(), 42);
        assert_eq!(r.store().resolve_urn(&stream, STORED).unwrap(), *volume.urn());
        let text = r.export(volume.urn());
        assert!(!text.contains("aff4volatile:"));
    }

    #[test]
    fn append_mode_keeps_old_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.aff4");
        let urn = {
            let r = resolver();
            let volume = r.create_volume(&path).unwrap();
            let urn = volume.urn().clone();
            r.write_member(&urn, &urn.join("one"), b"first", ZipCompression::Deflate)
                .unwrap();
            r.close(&volume).unwrap();
            urn
        };
        {
            let r = resolver();
            let volume = r.open_volume(&path, OpenMode::Write).unwrap();
            assert_eq!(volume.urn(), &urn);
            r.write_member(&urn, &urn.join("two"), b"second", ZipCompression::Stored)
                .unwrap();
            r.close(&volume).unwrap();
        }
        let r = resolver();
        r.open_volume(&path, OpenMode::Read).unwrap();
        assert_eq!(&*r.read_member(&urn.join("one")).unwrap(), b"first");
        assert_eq!(&*r.read_member(&urn.join("two")).unwrap(), b"second");
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.aff4");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
        let r = resolver();
        assert!(matches!(
            r.open_volume(&path, OpenMode::Read),
            Err(Aff4Error::CorruptArchive(_))
        ));
    }

    #[test]
    fn crc_damage_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.aff4");
        let urn = {
            let r = resolver();
            let volume = r.create_volume(&path).unwrap();
            let urn = volume.urn().clone();
            r.write_member(&urn, &urn.join("m"), b"precious evidence", ZipCompression::Stored)
                .unwrap();
            r.close(&volume).unwrap();
            urn
        };
        let mut bytes = std::fs::read(&path).unwrap();
        let at = bytes
            .windows(8)
            .position(|w| w == b"precious")
            .unwrap();
        bytes[at] ^= 0x20;
        std::fs::write(&path, bytes).unwrap();

        let r = resolver();
        r.open_volume(&path, OpenMode::Read).unwrap();
        assert!(r.read_member(&urn.join("m")).unwrap_err().is_integrity());
    }

    #[test]
    fn foreign_member_names_stay_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver();
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        let guard = volume.lock().unwrap();
        let crate::object::Aff4Object::Volume(v) = &*guard else {
            panic!("not a volume");
        };
        assert_eq!(v.member_name(&volume.urn().join("a/b")), "a/b");
        assert_eq!(v.member_name(&Urn::from("aff4://elsewhere/x")), "aff4://elsewhere/x");
    }
}
