use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex};

use aff4_crypto::{DecryptionKey, KeyCache, RecipientKey, SigningIdentity};
use aff4_image::ImageConfig;
use aff4_store::{InMemoryTripleStore, Triple, TripleStore};
use aff4_types::predicates::{self, CONTAINS, STORED, TYPE};
use aff4_types::{Urn, Value};
use aff4_zip::{MemberEntry, ZipCompression};
use lru::LruCache;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::encrypted::EncryptedStream;
use crate::error::{Aff4Error, Aff4Result};
use crate::file::RawFile;
use crate::identity::{self, Identity};
use crate::image::ImageStream;
use crate::link::Link;
use crate::lock::{LockMode, LockOwner, LockTable};
use crate::map::MapStream;
use crate::object::{Aff4Object, ObjectHandle, ObjectKind, OpenMode, ReadScope};
use crate::volume::{MemberWriter, ZipVolume};

struct Slot {
    handle: ObjectHandle,
    refs: usize,
    /// Opened or created for writing; never evicted until closed.
    pinned: bool,
}

struct Arena {
    slots: HashMap<Urn, Slot>,
    /// Unreferenced, unpinned objects in least-recently-used order.
    idle: LruCache<Urn, ()>,
}

/// The resolver context.
///
/// Holds the attribute store, every live object, the decompressed member
/// cache, the key cache and the advisory lock table. Objects refer to one
/// another only by URN and come back here to reach each other.
///
/// Guards returned by [`ObjectHandle::lock`] must not be held across calls
/// into the resolver that touch the same object.
pub struct Resolver {
    config: ResolverConfig,
    store: InMemoryTripleStore,
    arena: Mutex<Arena>,
    members: Mutex<LruCache<Urn, Arc<[u8]>>>,
    keys: KeyCache,
    locks: LockTable,
    identities: Mutex<Vec<Urn>>,
    recipients: Mutex<Vec<RecipientKey>>,
    decryption_keys: Mutex<Vec<DecryptionKey>>,
    passphrase: Mutex<Option<String>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        let member_capacity =
            NonZeroUsize::new(config.member_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            locks: LockTable::new(config.lock_files),
            store: InMemoryTripleStore::new(),
            arena: Mutex::new(Arena {
                slots: HashMap::new(),
                idle: LruCache::unbounded(),
            }),
            members: Mutex::new(LruCache::new(member_capacity)),
            keys: KeyCache::new(),
            identities: Mutex::new(Vec::new()),
            recipients: Mutex::new(Vec::new()),
            decryption_keys: Mutex::new(Vec::new()),
            passphrase: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn store(&self) -> &InMemoryTripleStore {
        &self.store
    }

    // ---------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------

    pub fn resolve(&self, subject: &Urn, predicate: &str) -> Aff4Result<Value> {
        Ok(self.store.resolve(subject, predicate)?)
    }

    pub fn resolve_all(&self, subject: &Urn, predicate: &str) -> Vec<Value> {
        self.store.resolve_all(subject, predicate)
    }

    pub fn set(&self, subject: &Urn, predicate: &str, value: impl Into<Value>) -> Aff4Result<()> {
        Ok(self.store.set(subject, predicate, value.into())?)
    }

    pub fn add(&self, subject: &Urn, predicate: &str, value: impl Into<Value>) -> Aff4Result<()> {
        Ok(self.store.add(subject, predicate, value.into())?)
    }

    /// Add unless an equal value is present. Returns `true` if added.
    pub fn add_unique(
        &self,
        subject: &Urn,
        predicate: &str,
        value: impl Into<Value>,
    ) -> Aff4Result<bool> {
        Ok(self.store.add_unique(subject, predicate, value.into())?)
    }

    pub fn delete(&self, subject: &Urn, predicate: &str) -> bool {
        self.store.delete(subject, predicate)
    }

    pub fn export(&self, subject: &Urn) -> String {
        self.store.export(subject)
    }

    /// Load properties text; relative URNs resolve against `context`.
    pub fn parse(&self, context: &Urn, text: &str) -> Aff4Result<usize> {
        Ok(self.store.parse(context, text)?)
    }

    pub fn query(
        &self,
        subject_prefix: Option<&str>,
        predicate_prefix: Option<&str>,
        value_prefix: Option<&str>,
    ) -> Vec<Triple> {
        self.store
            .query(subject_prefix, predicate_prefix, value_prefix)
    }

    // ---------------------------------------------------------------
    // Object arena
    // ---------------------------------------------------------------

    /// Open an object, reusing the live instance when there is one.
    ///
    /// The type comes from `aff4:type`, falling back to the URN scheme for
    /// plain files.
    pub fn open(&self, urn: &Urn, mode: OpenMode) -> Aff4Result<ObjectHandle> {
        if let Some(handle) = self.lookup(urn, mode) {
            if mode == OpenMode::Write && handle.kind() == ObjectKind::RawFile {
                let made = handle
                    .lock()
                    .and_then(|mut guard| match guard.as_file_mut() {
                        Some(file) => file.make_writable(),
                        None => Ok(()),
                    });
                if let Err(e) = made {
                    self.cache_return(&handle);
                    return Err(e);
                }
            }
            return Ok(handle);
        }
        let object = self.construct(urn, mode)?;
        Ok(self.register(object, mode == OpenMode::Write))
    }

    /// Whether `urn` is live in the arena.
    pub fn is_cached(&self, urn: &Urn) -> bool {
        self.arena
            .lock()
            .expect("lock poisoned")
            .slots
            .contains_key(urn)
    }

    /// Give back a handle obtained from [`open`](Self::open) or
    /// [`create`](Self::create).
    pub fn cache_return(&self, handle: &ObjectHandle) {
        let mut arena = self.arena.lock().expect("lock poisoned");
        let Some(slot) = arena.slots.get_mut(handle.urn()) else {
            return;
        };
        if !slot.handle.same_object(handle) {
            return;
        }
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 && !slot.pinned {
            arena.idle.put(handle.urn().clone(), ());
            self.evict_idle(&mut arena);
        }
    }

    /// Run `f` on an object opened for the duration of the call.
    pub fn with_object<T>(
        &self,
        urn: &Urn,
        mode: OpenMode,
        f: impl FnOnce(&mut Aff4Object) -> Aff4Result<T>,
    ) -> Aff4Result<T> {
        let handle = self.open(urn, mode)?;
        let result = handle.lock().and_then(|mut guard| f(&mut guard));
        self.cache_return(&handle);
        result
    }

    /// Allocate a fresh object of `kind` for writing.
    ///
    /// Attributes the constructor depends on (`aff4:stored` for streams and
    /// volumes, `aff4:target` for links) must already be set.
    pub fn create(&self, kind: ObjectKind, urn: Option<Urn>) -> Aff4Result<ObjectHandle> {
        let urn = urn.unwrap_or_else(Urn::random);
        if self.is_cached(&urn) {
            return Err(Aff4Error::InvalidArgument(format!("{urn} is already open")));
        }
        let object = match kind {
            ObjectKind::RawFile => Aff4Object::RawFile(RawFile::open(&urn, OpenMode::Write)?),
            ObjectKind::Volume => Aff4Object::Volume(ZipVolume::create(self, &urn)?),
            ObjectKind::Image => Aff4Object::Image(ImageStream::create(self, &urn)?),
            ObjectKind::Map => Aff4Object::Map(MapStream::create(self, &urn)?),
            ObjectKind::Encrypted => Aff4Object::Encrypted(EncryptedStream::create(self, &urn)?),
            ObjectKind::Link => Aff4Object::Link(Link::open(self, &urn)?),
            ObjectKind::Identity => {
                return Err(Aff4Error::InvalidArgument(
                    "identities are registered with add_identity".into(),
                ))
            }
        };
        if kind != ObjectKind::RawFile {
            self.set(&urn, TYPE, kind.type_name())?;
        }
        debug!(urn = %urn, ?kind, "created object");
        Ok(self.register(object, true))
    }

    /// Finalize an object and drop it from the arena.
    ///
    /// Closing a volume first closes every stream still being written into
    /// it.
    pub fn close(&self, handle: &ObjectHandle) -> Aff4Result<()> {
        if handle.is_closed() {
            return Err(Aff4Error::Closed(handle.urn().clone()));
        }
        if handle.kind() == ObjectKind::Volume {
            self.close_children(handle.urn())?;
        }
        let result = {
            let mut guard = handle.lock()?;
            match &mut *guard {
                Aff4Object::RawFile(file) => file.sync(),
                Aff4Object::Volume(volume) => volume.close(self),
                Aff4Object::Image(image) => image.close(self),
                Aff4Object::Map(map) => map.close(self),
                Aff4Object::Encrypted(stream) => stream.close(self),
                Aff4Object::Link(_) | Aff4Object::Identity(_) => Ok(()),
            }
        };
        handle.mark_closed();
        let mut arena = self.arena.lock().expect("lock poisoned");
        if arena
            .slots
            .get(handle.urn())
            .is_some_and(|slot| slot.handle.same_object(handle))
        {
            arena.slots.remove(handle.urn());
            arena.idle.pop(handle.urn());
        }
        drop(arena);
        debug!(urn = %handle.urn(), kind = ?handle.kind(), "closed object");
        result
    }

    /// Close a live object by URN; a no-op when it is not live.
    pub fn close_urn(&self, urn: &Urn) -> Aff4Result<()> {
        let handle = {
            let arena = self.arena.lock().expect("lock poisoned");
            arena.slots.get(urn).map(|slot| slot.handle.clone())
        };
        match handle {
            Some(handle) => self.close(&handle),
            None => Ok(()),
        }
    }

    /// Close every object still open for writing, volumes after the streams
    /// they store.
    pub fn close_all(&self) -> Aff4Result<()> {
        let mut pinned = self.pinned_handles();
        pinned.sort_by_key(|h| close_order(h.kind()));
        let mut first_error = None;
        for handle in pinned {
            if handle.is_closed() || handle.kind() == ObjectKind::Identity {
                continue;
            }
            if let Err(e) = self.close(&handle) {
                warn!(urn = %handle.urn(), error = %e, "close failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn close_children(&self, volume: &Urn) -> Aff4Result<()> {
        let mut children: Vec<ObjectHandle> = self
            .pinned_handles()
            .into_iter()
            .filter(|h| h.kind().is_stream() && h.kind() != ObjectKind::RawFile)
            .filter(|h| self.store.resolve_urns(h.urn(), STORED).contains(volume))
            .collect();
        children.sort_by_key(|h| close_order(h.kind()));
        for child in children {
            if !child.is_closed() {
                self.close(&child)?;
            }
        }
        Ok(())
    }

    fn pinned_handles(&self) -> Vec<ObjectHandle> {
        let arena = self.arena.lock().expect("lock poisoned");
        arena
            .slots
            .values()
            .filter(|slot| slot.pinned)
            .map(|slot| slot.handle.clone())
            .collect()
    }

    fn lookup(&self, urn: &Urn, mode: OpenMode) -> Option<ObjectHandle> {
        let mut arena = self.arena.lock().expect("lock poisoned");
        let slot = arena.slots.get_mut(urn)?;
        slot.refs += 1;
        slot.pinned |= mode == OpenMode::Write;
        let handle = slot.handle.clone();
        arena.idle.pop(urn);
        Some(handle)
    }

    fn register(&self, object: Aff4Object, pinned: bool) -> ObjectHandle {
        let urn = object.urn().clone();
        let mut arena = self.arena.lock().expect("lock poisoned");
        if let Some(slot) = arena.slots.get_mut(&urn) {
            // Lost a race with another opener; keep the first instance.
            slot.refs += 1;
            slot.pinned |= pinned;
            let handle = slot.handle.clone();
            arena.idle.pop(&urn);
            return handle;
        }
        let handle = ObjectHandle::new(object);
        arena.slots.insert(
            urn,
            Slot {
                handle: handle.clone(),
                refs: 1,
                pinned,
            },
        );
        handle
    }

    fn evict_idle(&self, arena: &mut Arena) {
        while arena.idle.len() > self.config.cache_capacity {
            let Some((urn, ())) = arena.idle.pop_lru() else {
                break;
            };
            let evicted = arena.slots.remove(&urn);
            // Stream keys live no longer than their stream.
            if evicted.is_some_and(|slot| slot.handle.kind() == ObjectKind::Encrypted) {
                self.keys.evict(&urn);
            }
            debug!(urn = %urn, "evicted idle object");
        }
    }

    fn construct(&self, urn: &Urn, mode: OpenMode) -> Aff4Result<Aff4Object> {
        let declared = match self.store.resolve_string(urn, TYPE) {
            Ok(name) => Some(name),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        let kind = match declared {
            Some(name) => ObjectKind::from_type_name(&name).ok_or_else(|| {
                Aff4Error::TypeDispatch {
                    subject: urn.clone(),
                    declared: name,
                }
            })?,
            None if urn.scheme() == Some(aff4_types::urn::FILE_SCHEME) => ObjectKind::RawFile,
            None => return Err(Aff4Error::not_found(urn, TYPE)),
        };
        debug!(urn = %urn, ?kind, ?mode, "constructing object");
        Ok(match kind {
            ObjectKind::RawFile => Aff4Object::RawFile(RawFile::open(urn, mode)?),
            ObjectKind::Volume => Aff4Object::Volume(ZipVolume::open(self, urn, mode)?),
            ObjectKind::Image => Aff4Object::Image(ImageStream::open(self, urn, mode)?),
            ObjectKind::Map => Aff4Object::Map(MapStream::open(self, urn, mode)?),
            ObjectKind::Encrypted => {
                Aff4Object::Encrypted(EncryptedStream::open(self, urn, mode)?)
            }
            ObjectKind::Link => Aff4Object::Link(Link::open(self, urn)?),
            ObjectKind::Identity => Aff4Object::Identity(Identity::open(self, urn)?),
        })
    }

    // ---------------------------------------------------------------
    // Volumes
    // ---------------------------------------------------------------

    /// Start a new, empty volume at `path`, replacing any file there.
    pub fn create_volume(&self, path: &Path) -> Aff4Result<ObjectHandle> {
        let backing = Urn::from_path(path);
        let urn = Urn::random();
        self.set(&urn, STORED, &backing)?;
        self.create(ObjectKind::Volume, Some(urn))
    }

    /// Open the volume stored in the file at `path`.
    ///
    /// In write mode an existing volume is reopened for appending and a
    /// missing or empty file gets a fresh volume.
    pub fn open_volume(&self, path: &Path, mode: OpenMode) -> Aff4Result<ObjectHandle> {
        let backing = Urn::from_path(path);
        if mode == OpenMode::Write && std::fs::metadata(path).map_or(true, |m| m.len() == 0) {
            return self.create_volume(path);
        }
        self.load_volume(&backing, mode)
    }

    /// Open the volume stored in the file `backing`, reusing a live one.
    pub fn load_volume(&self, backing: &Urn, mode: OpenMode) -> Aff4Result<ObjectHandle> {
        if let Some(handle) = self.live_volume_on(backing, mode) {
            return Ok(handle);
        }
        let volume = ZipVolume::load(self, backing, mode)?;
        let urn = volume.urn().clone();
        info!(volume = %urn, file = %backing, members = volume.member_count(), "loaded volume");
        let handle = self.register(Aff4Object::Volume(volume), mode == OpenMode::Write);
        if self.config.autoload {
            self.autoload(&urn, backing);
        }
        Ok(handle)
    }

    fn live_volume_on(&self, backing: &Urn, mode: OpenMode) -> Option<ObjectHandle> {
        self.store
            .query(None, Some(STORED), Some(backing.as_str()))
            .into_iter()
            .filter(|t| t.value.as_urn() == Some(backing))
            .find_map(|t| {
                let is_volume = self
                    .store
                    .resolve_string(&t.subject, TYPE)
                    .is_ok_and(|ty| ty == predicates::TYPE_ZIP_VOLUME);
                if is_volume {
                    self.lookup(&t.subject, mode)
                } else {
                    None
                }
            })
    }

    fn autoload(&self, volume: &Urn, backing: &Urn) {
        for target in self.store.resolve_urns(volume, predicates::AUTOLOAD) {
            let file = if target.scheme() == Some(aff4_types::urn::FILE_SCHEME) {
                target.clone()
            } else {
                // Relative names point at sibling files of this volume.
                let name = target
                    .relative_to(volume)
                    .unwrap_or_else(|| target.as_str().rsplit('/').next().unwrap_or_default());
                backing.parent().join(name)
            };
            match self.load_volume(&file, OpenMode::Read) {
                Ok(handle) => {
                    debug!(volume = %volume, loaded = %handle.urn(), "autoloaded volume");
                    self.cache_return(&handle);
                }
                Err(e) => warn!(volume = %volume, target = %file, error = %e, "autoload failed"),
            }
        }
    }

    // ---------------------------------------------------------------
    // Members
    // ---------------------------------------------------------------

    /// Write a whole member into `volume` in one step.
    pub fn write_member(
        &self,
        volume: &Urn,
        member: &Urn,
        data: &[u8],
        compression: ZipCompression,
    ) -> Aff4Result<MemberEntry> {
        let entry = self.with_object(volume, OpenMode::Write, |object| {
            volume_mut(object)?.write_member(self, member, data, compression)
        })?;
        self.forget_member(member);
        Ok(entry)
    }

    /// Start streaming a member into `volume`. Holds the volume's write
    /// lock until the writer is finished or dropped.
    pub fn begin_member(
        &self,
        volume: &Urn,
        member: &Urn,
        compression: ZipCompression,
    ) -> Aff4Result<MemberWriter<'_>> {
        self.with_object(volume, OpenMode::Write, |object| {
            volume_mut(object)?.begin_member(self, member, compression)
        })?;
        Ok(MemberWriter::new(self, volume.clone(), member.clone()))
    }

    /// The decompressed, CRC-checked content of a member.
    pub fn read_member(&self, member: &Urn) -> Aff4Result<Arc<[u8]>> {
        if let Some(hit) = self.members.lock().expect("lock poisoned").get(member) {
            return Ok(Arc::clone(hit));
        }
        let volume = self.store.resolve_urn(member, STORED)?;
        let data: Arc<[u8]> = self
            .with_object(&volume, OpenMode::Read, |object| {
                volume_mut(object)?.read_member(self, member)
            })?
            .into();
        self.members
            .lock()
            .expect("lock poisoned")
            .put(member.clone(), Arc::clone(&data));
        Ok(data)
    }

    /// Bytes `range` of a member's content.
    ///
    /// Stored members are read in place; compressed ones go through the
    /// member cache.
    pub fn read_member_range(&self, member: &Urn, range: Range<u64>) -> Aff4Result<Vec<u8>> {
        if let Some(hit) = self.members.lock().expect("lock poisoned").get(member) {
            return slice_range(member, hit, range);
        }
        let volume = self.store.resolve_urn(member, STORED)?;
        let direct = self.with_object(&volume, OpenMode::Read, |object| {
            volume_mut(object)?.read_stored_range(self, member, range.clone())
        })?;
        match direct {
            Some(bytes) => Ok(bytes),
            None => slice_range(member, &self.read_member(member)?, range),
        }
    }

    pub fn member_exists(&self, member: &Urn) -> bool {
        self.store
            .resolve_urn(member, STORED)
            .is_ok_and(|volume| self.store.resolve_urns(&volume, CONTAINS).contains(member))
    }

    pub(crate) fn forget_member(&self, member: &Urn) {
        self.members.lock().expect("lock poisoned").pop(member);
    }

    // ---------------------------------------------------------------
    // Streams
    // ---------------------------------------------------------------

    /// Create an image stream stored in `volume`.
    pub fn create_image(&self, volume: &Urn, urn: Option<Urn>) -> Aff4Result<ObjectHandle> {
        let urn = urn.unwrap_or_else(Urn::random);
        self.set(&urn, STORED, volume)?;
        self.create(ObjectKind::Image, Some(urn))
    }

    /// Create an image stream with its own geometry and compression.
    pub fn create_image_with(
        &self,
        volume: &Urn,
        urn: Option<Urn>,
        config: ImageConfig,
    ) -> Aff4Result<ObjectHandle> {
        let urn = urn.unwrap_or_else(Urn::random);
        if self.is_cached(&urn) {
            return Err(Aff4Error::InvalidArgument(format!("{urn} is already open")));
        }
        self.set(&urn, STORED, volume)?;
        let image = ImageStream::create_with(self, &urn, config)?;
        self.set(&urn, TYPE, ObjectKind::Image.type_name())?;
        debug!(urn = %urn, "created image stream");
        Ok(self.register(Aff4Object::Image(image), true))
    }

    /// Create a map stream stored in `volume`.
    pub fn create_map(&self, volume: &Urn, urn: Option<Urn>) -> Aff4Result<ObjectHandle> {
        let urn = urn.unwrap_or_else(Urn::random);
        self.set(&urn, STORED, volume)?;
        self.create(ObjectKind::Map, Some(urn))
    }

    /// Create an encrypted stream stored in `volume`, backed by a new image
    /// stream `{urn}/data`.
    pub fn create_encrypted(&self, volume: &Urn, urn: Option<Urn>) -> Aff4Result<ObjectHandle> {
        let urn = urn.unwrap_or_else(Urn::random);
        self.set(&urn, STORED, volume)?;
        self.create(ObjectKind::Encrypted, Some(urn))
    }

    /// Create a link `urn` to `target`, recorded in `volume`.
    pub fn create_link(&self, volume: &Urn, urn: &Urn, target: &Urn) -> Aff4Result<ObjectHandle> {
        self.set(urn, STORED, volume)?;
        self.set(urn, predicates::TARGET, target)?;
        self.create(ObjectKind::Link, Some(urn.clone()))
    }

    /// Read from any stream at `offset` without moving its position.
    ///
    /// Fails with [`Aff4Error::CorruptArchive`] when `urn` is already being
    /// read further up this thread's chain of map, link or encrypted
    /// targets.
    pub fn read_stream_at(&self, urn: &Urn, offset: u64, buf: &mut [u8]) -> Aff4Result<usize> {
        ReadScope::check(urn)?;
        self.with_object(urn, OpenMode::Read, |object| object.read_at(self, offset, buf))
    }

    /// Append to a stream open for writing.
    pub fn write_stream(&self, urn: &Urn, data: &[u8]) -> Aff4Result<usize> {
        self.with_object(urn, OpenMode::Write, |object| object.write(self, data))
    }

    pub fn stream_size(&self, urn: &Urn) -> Aff4Result<u64> {
        ReadScope::check(urn)?;
        self.with_object(urn, OpenMode::Read, |object| object.size(self))
    }

    /// Re-read an image stream and compare it with its stored hash.
    pub fn verify_image(&self, urn: &Urn) -> Aff4Result<()> {
        self.with_object(urn, OpenMode::Read, |object| match object.as_image_mut() {
            Some(image) => image.verify(self),
            None => Err(Aff4Error::InvalidArgument(format!("{urn} is not an image"))),
        })
    }

    // ---------------------------------------------------------------
    // Locks
    // ---------------------------------------------------------------

    pub fn lock(&self, urn: &Urn, mode: LockMode) -> Aff4Result<()> {
        self.locks.lock(urn, mode)
    }

    pub fn try_lock(&self, urn: &Urn, mode: LockMode) -> Aff4Result<bool> {
        self.locks.try_lock(urn, mode)
    }

    pub fn unlock(&self, urn: &Urn, mode: LockMode) -> bool {
        self.locks.unlock(urn, mode)
    }

    pub fn is_locked(&self, urn: &Urn, mode: LockMode) -> bool {
        self.locks.is_locked(urn, mode)
    }

    /// Take a lock for `owner` rather than the calling thread.
    pub fn lock_as(&self, urn: &Urn, mode: LockMode, owner: LockOwner) -> Aff4Result<()> {
        self.locks.lock_as(urn, mode, owner)
    }

    pub fn unlock_as(&self, urn: &Urn, mode: LockMode, owner: LockOwner) -> bool {
        self.locks.unlock_as(urn, mode, owner)
    }

    // ---------------------------------------------------------------
    // Keys and identities
    // ---------------------------------------------------------------

    pub fn keys(&self) -> &KeyCache {
        &self.keys
    }

    pub fn set_passphrase(&self, passphrase: impl Into<String>) {
        *self.passphrase.lock().expect("lock poisoned") = Some(passphrase.into());
    }

    /// The programmatic passphrase, else the configured environment
    /// variable.
    pub fn passphrase(&self) -> Option<String> {
        self.passphrase
            .lock()
            .expect("lock poisoned")
            .clone()
            .or_else(|| self.config.passphrase_from_env())
    }

    /// Seal keys of new encrypted streams to `recipient` too.
    pub fn add_recipient(&self, recipient: RecipientKey) {
        self.recipients.lock().expect("lock poisoned").push(recipient);
    }

    pub fn recipients(&self) -> Vec<RecipientKey> {
        self.recipients.lock().expect("lock poisoned").clone()
    }

    /// Make `key` available for opening sealed encrypted streams.
    pub fn add_decryption_key(&self, key: DecryptionKey) {
        self.decryption_keys.lock().expect("lock poisoned").push(key);
    }

    /// Run `f` on each decryption key until it returns `Some`.
    pub(crate) fn find_with_decryption_keys<T>(
        &self,
        mut f: impl FnMut(&DecryptionKey) -> Option<T>,
    ) -> Option<T> {
        self.decryption_keys
            .lock()
            .expect("lock poisoned")
            .iter()
            .find_map(|key| f(key))
    }

    /// Register a signing identity from its key and certificate files.
    pub fn add_identity(&self, key_file: &Path, cert_file: &Path) -> Aff4Result<Urn> {
        let key = std::fs::read_to_string(key_file)?;
        let cert = std::fs::read_to_string(cert_file)?;
        self.add_identity_texts(&key, &cert)
    }

    pub fn add_identity_texts(&self, key_text: &str, cert_text: &str) -> Aff4Result<Urn> {
        let signer = SigningIdentity::from_texts(key_text, cert_text)?;
        let identity = Identity::register(self, signer)?;
        let urn = identity.urn().clone();
        let handle = self.register(Aff4Object::Identity(identity), true);
        self.cache_return(&handle);
        let mut identities = self.identities.lock().expect("lock poisoned");
        if !identities.contains(&urn) {
            identities.push(urn.clone());
        }
        info!(identity = %urn, "identity registered");
        Ok(urn)
    }

    /// Identities that sign statements when volumes close.
    pub fn identities(&self) -> Vec<Urn> {
        self.identities.lock().expect("lock poisoned").clone()
    }

    /// Check a statement's signature; returns the attested
    /// (subject, hash) pairs.
    pub fn verify_statement(&self, statement: &Urn) -> Aff4Result<Vec<(Urn, String)>> {
        let owner = self
            .store
            .query(None, Some(predicates::STATEMENT), Some(statement.as_str()))
            .into_iter()
            .find(|t| t.value.as_urn() == Some(statement))
            .map(|t| t.subject)
            .ok_or_else(|| Aff4Error::not_found(statement, "owning identity"))?;
        let certificate = identity::certificate_of(self, &owner)?;
        let text = self.read_member(statement)?;
        let signature = self.read_member(&identity::signature_urn(statement))?;
        identity::verify_statement(&certificate, &text, &signature)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.arena.lock().expect("lock poisoned");
        f.debug_struct("Resolver")
            .field("live_objects", &arena.slots.len())
            .field("idle_objects", &arena.idle.len())
            .field("triples", &self.store.len())
            .finish_non_exhaustive()
    }
}

fn close_order(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Encrypted => 0,
        ObjectKind::Map => 1,
        ObjectKind::Link => 2,
        ObjectKind::Image => 3,
        ObjectKind::Volume => 4,
        ObjectKind::RawFile => 5,
        ObjectKind::Identity => 6,
    }
}

pub(crate) fn volume_mut(object: &mut Aff4Object) -> Aff4Result<&mut ZipVolume> {
    let urn = object.urn().clone();
    object
        .as_volume_mut()
        .ok_or_else(|| Aff4Error::InvalidArgument(format!("{urn} is not a volume")))
}

fn slice_range(member: &Urn, data: &[u8], range: Range<u64>) -> Aff4Result<Vec<u8>> {
    data.get(range.start as usize..range.end as usize)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Aff4Error::not_found(member, format!("bytes {range:?}")))
}
