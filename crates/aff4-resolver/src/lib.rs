//! The AFF4 resolver and the objects it manages.
//!
//! Every AFF4 object (files, ZIP volumes, image, map, encrypted and link
//! streams, signing identities) is identified by a URN and described by
//! triples in the resolver's attribute store. The resolver constructs
//! objects on demand from their `aff4:type`, keeps live instances in an
//! arena and evicts idle ones, and arbitrates writers with advisory locks.
//!
//! # Key Types
//!
//! - [`Resolver`]: attribute store, object arena, member and key caches
//! - [`ObjectHandle`] / [`Aff4Object`]: a live object and its variants
//! - [`Stream`]: byte-stream behavior shared by every stream kind
//! - [`ZipVolume`] / [`MemberWriter`]: the container and streamed members
//! - [`ImageStream`], [`MapStream`], [`EncryptedStream`], [`Link`]
//! - [`Identity`]: Ed25519 signer of hash statements
//! - [`ResolverConfig`]: capacities, policies and image defaults
//! - [`Aff4Error`]: the error type of every operation
//!
//! # Architecture
//!
//! ```text
//!   Resolver ── InMemoryTripleStore (attributes)
//!      │
//!      ├── arena: URN → ObjectHandle (Mutex<Aff4Object>)
//!      │      ZipVolume ── RawFile (backing file)
//!      │      ImageStream ── segment members ── ZipVolume
//!      │      MapStream ── target streams
//!      │      EncryptedStream ── {urn}/data image
//!      │      Link ── target stream
//!      ├── member cache (decompressed members)
//!      ├── key cache
//!      └── lock table
//! ```
//!
//! # Design Rules
//!
//! - Objects reference each other by URN only and reach each other through
//!   the resolver; no object owns another.
//! - Objects opened or created for writing stay live until closed.
//! - Closing a volume closes the streams written into it first.
//! - Reads never return uninitialized bytes: gaps and lost chunks read as
//!   zeros.

pub mod config;
pub mod encrypted;
pub mod error;
pub mod file;
pub mod identity;
pub mod image;
pub mod link;
pub mod lock;
pub mod map;
pub mod object;
pub mod resolver;
pub mod volume;

pub use config::{MapReadPolicy, ResolverConfig, AUTOLOAD_ENV};
pub use encrypted::EncryptedStream;
pub use error::{Aff4Error, Aff4Result};
pub use file::RawFile;
pub use identity::{Identity, Statement};
pub use image::ImageStream;
pub use link::Link;
pub use lock::{LockMode, LockOwner};
pub use map::MapStream;
pub use object::{Aff4Object, ObjectHandle, ObjectKind, OpenMode, Stream};
pub use resolver::Resolver;
pub use volume::{MemberWriter, ZipVolume};
