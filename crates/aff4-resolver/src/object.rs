use std::cell::RefCell;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use aff4_types::predicates;
use aff4_types::Urn;

use crate::encrypted::EncryptedStream;
use crate::error::{Aff4Error, Aff4Result};
use crate::file::RawFile;
use crate::identity::Identity;
use crate::image::ImageStream;
use crate::link::Link;
use crate::map::MapStream;
use crate::resolver::Resolver;
use crate::volume::ZipVolume;

/// How an object is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpenMode {
    Read,
    Write,
}

/// Every kind of object the resolver can construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    RawFile,
    Volume,
    Image,
    Map,
    Encrypted,
    Link,
    Identity,
}

impl ObjectKind {
    /// The `aff4:type` value naming this kind.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::RawFile => predicates::TYPE_FILE,
            Self::Volume => predicates::TYPE_ZIP_VOLUME,
            Self::Image => predicates::TYPE_IMAGE,
            Self::Map => predicates::TYPE_MAP,
            Self::Encrypted => predicates::TYPE_ENCRYPTED,
            Self::Link => predicates::TYPE_LINK,
            Self::Identity => predicates::TYPE_IDENTITY,
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        [
            Self::RawFile,
            Self::Volume,
            Self::Image,
            Self::Map,
            Self::Encrypted,
            Self::Link,
            Self::Identity,
        ]
        .into_iter()
        .find(|kind| kind.type_name() == name)
    }

    pub fn is_stream(self) -> bool {
        !matches!(self, Self::Volume | Self::Identity)
    }
}

/// Byte-stream behaviour shared by files, images, maps, encrypted streams
/// and links.
pub trait Stream {
    fn size(&self, resolver: &Resolver) -> Aff4Result<u64>;

    fn read_at(&mut self, resolver: &Resolver, offset: u64, buf: &mut [u8]) -> Aff4Result<usize>;

    /// Append at the end of the stream.
    fn write(&mut self, resolver: &Resolver, data: &[u8]) -> Aff4Result<usize>;

    fn position(&self) -> u64;

    fn set_position(&mut self, position: u64);
}

thread_local! {
    /// Streams this thread is reading through, outermost first.
    static READ_CHAIN: RefCell<Vec<Urn>> = const { RefCell::new(Vec::new()) };
}

/// Marks a stream as being read on this thread until dropped.
///
/// Maps, links and encrypted streams read other streams through the
/// resolver while their own object is locked, so a stream that reappears
/// further down the chain would wait on itself.
pub(crate) struct ReadScope(());

impl ReadScope {
    pub(crate) fn enter(urn: &Urn) -> Aff4Result<Self> {
        Self::check(urn)?;
        READ_CHAIN.with(|chain| chain.borrow_mut().push(urn.clone()));
        Ok(Self(()))
    }

    /// Fail if `urn` is already being read further up this thread's chain.
    pub(crate) fn check(urn: &Urn) -> Aff4Result<()> {
        READ_CHAIN.with(|chain| {
            let chain = chain.borrow();
            match chain.iter().position(|u| u == urn) {
                None => Ok(()),
                Some(start) => {
                    let cycle: Vec<&str> = chain[start..].iter().map(Urn::as_str).collect();
                    Err(Aff4Error::CorruptArchive(format!(
                        "stream reference cycle: {} -> {urn}",
                        cycle.join(" -> ")
                    )))
                }
            }
        })
    }
}

impl Drop for ReadScope {
    fn drop(&mut self) {
        READ_CHAIN.with(|chain| {
            chain.borrow_mut().pop();
        });
    }
}

/// A live object.
#[derive(Debug)]
pub enum Aff4Object {
    RawFile(RawFile),
    Volume(ZipVolume),
    Image(ImageStream),
    Map(MapStream),
    Encrypted(EncryptedStream),
    Link(Link),
    Identity(Identity),
}

impl Aff4Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::RawFile(_) => ObjectKind::RawFile,
            Self::Volume(_) => ObjectKind::Volume,
            Self::Image(_) => ObjectKind::Image,
            Self::Map(_) => ObjectKind::Map,
            Self::Encrypted(_) => ObjectKind::Encrypted,
            Self::Link(_) => ObjectKind::Link,
            Self::Identity(_) => ObjectKind::Identity,
        }
    }

    pub fn urn(&self) -> &Urn {
        match self {
            Self::RawFile(o) => o.urn(),
            Self::Volume(o) => o.urn(),
            Self::Image(o) => o.urn(),
            Self::Map(o) => o.urn(),
            Self::Encrypted(o) => o.urn(),
            Self::Link(o) => o.urn(),
            Self::Identity(o) => o.urn(),
        }
    }

    pub fn as_stream_mut(&mut self) -> Option<&mut dyn Stream> {
        match self {
            Self::RawFile(o) => Some(o),
            Self::Image(o) => Some(o),
            Self::Map(o) => Some(o),
            Self::Encrypted(o) => Some(o),
            Self::Link(o) => Some(o),
            Self::Volume(_) | Self::Identity(_) => None,
        }
    }

    fn stream(&mut self) -> Aff4Result<&mut dyn Stream> {
        let urn = self.urn().clone();
        let kind = self.kind();
        self.as_stream_mut()
            .ok_or_else(|| Aff4Error::InvalidArgument(format!("{urn} is a {kind:?}, not a stream")))
    }

    pub fn size(&mut self, resolver: &Resolver) -> Aff4Result<u64> {
        let _scope = ReadScope::enter(self.urn())?;
        self.stream()?.size(resolver)
    }

    pub fn read_at(&mut self, resolver: &Resolver, offset: u64, buf: &mut [u8]) -> Aff4Result<usize> {
        let _scope = ReadScope::enter(self.urn())?;
        self.stream()?.read_at(resolver, offset, buf)
    }

    /// Read from the current position and advance it.
    pub fn read(&mut self, resolver: &Resolver, buf: &mut [u8]) -> Aff4Result<usize> {
        let _scope = ReadScope::enter(self.urn())?;
        let stream = self.stream()?;
        let position = stream.position();
        let n = stream.read_at(resolver, position, buf)?;
        stream.set_position(position + n as u64);
        Ok(n)
    }

    pub fn write(&mut self, resolver: &Resolver, data: &[u8]) -> Aff4Result<usize> {
        self.stream()?.write(resolver, data)
    }

    /// Move the read position. Seeking past the end is allowed; reads there
    /// return nothing.
    pub fn seek(&mut self, resolver: &Resolver, pos: SeekFrom) -> Aff4Result<u64> {
        let position = self.stream()?.position();
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size(resolver)?.checked_add_signed(delta),
        };
        let target = target
            .ok_or_else(|| Aff4Error::InvalidArgument(format!("seek to {pos:?} underflows")))?;
        self.stream()?.set_position(target);
        Ok(target)
    }

    pub fn tell(&mut self) -> Aff4Result<u64> {
        Ok(self.stream()?.position())
    }

    pub fn as_volume_mut(&mut self) -> Option<&mut ZipVolume> {
        match self {
            Self::Volume(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_image_mut(&mut self) -> Option<&mut ImageStream> {
        match self {
            Self::Image(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut MapStream> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut RawFile> {
        match self {
            Self::RawFile(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_identity(&self) -> Option<&Identity> {
        match self {
            Self::Identity(i) => Some(i),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Cell {
    object: Mutex<Aff4Object>,
    closed: AtomicBool,
}

/// Shared reference to a live object.
///
/// Handles are cheap to clone. Every handle obtained from
/// [`Resolver::open`] should be given back with [`Resolver::cache_return`]
/// so the object can be evicted once idle.
#[derive(Clone, Debug)]
pub struct ObjectHandle {
    urn: Urn,
    kind: ObjectKind,
    cell: Arc<Cell>,
}

impl ObjectHandle {
    pub(crate) fn new(object: Aff4Object) -> Self {
        Self {
            urn: object.urn().clone(),
            kind: object.kind(),
            cell: Arc::new(Cell {
                object: Mutex::new(object),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Lock the object for use.
    pub fn lock(&self) -> Aff4Result<MutexGuard<'_, Aff4Object>> {
        if self.is_closed() {
            return Err(Aff4Error::Closed(self.urn.clone()));
        }
        Ok(self.cell.object.lock().expect("lock poisoned"))
    }

    pub fn is_closed(&self) -> bool {
        self.cell.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.cell.closed.store(true, Ordering::Release);
    }

    /// Whether both handles refer to the same live object.
    pub fn same_object(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}
