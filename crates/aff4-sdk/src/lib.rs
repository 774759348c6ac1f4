//! High-level SDK for AFF4 evidence containers.
//!
//! [`Aff4`] opens one or more container files and exposes the evidence in
//! them as a seekable byte stream behind an opaque [`Aff4Handle`]. It also
//! writes new volumes and images. Everything else goes through the
//! [`Resolver`] returned by [`Aff4::resolver`].

pub mod container;
pub mod error;
pub mod request;

pub use container::{Aff4, Aff4Handle};
pub use error::{SdkError, SdkResult};
pub use request::{ImageInfo, ImageRequest};

// Re-export key types
pub use aff4_crypto::HashAlgorithm;
pub use aff4_image::ChunkCompression;
pub use aff4_zip::ZipCompression;
pub use aff4_resolver::{Aff4Error, MapReadPolicy, MapStream, OpenMode, Resolver, ResolverConfig};
pub use aff4_store::Triple;
pub use aff4_types::{Urn, Value};
