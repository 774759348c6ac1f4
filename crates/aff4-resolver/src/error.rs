use std::io;

use aff4_crypto::CryptoError;
use aff4_image::ImageError;
use aff4_map::MapError;
use aff4_store::StoreError;
use aff4_types::{TypeError, Urn};
use aff4_zip::ZipError;

/// Errors surfaced by the resolver and every object it manages.
#[derive(Debug, thiserror::Error)]
pub enum Aff4Error {
    /// A subject, attribute or member does not exist. Recoverable.
    #[error("not found: {what} of {subject}")]
    NotFound { subject: Urn, what: String },

    /// The declared `aff4:type` has no constructor.
    #[error("cannot open {subject}: unknown type {declared:?}")]
    TypeDispatch { subject: Urn, declared: String },

    /// Archive structures are damaged.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// A checksum, length or digest does not match.
    #[error("integrity failure for {subject}: {reason}")]
    Integrity { subject: String, reason: String },

    /// Another member writer holds the volume.
    #[error("volume {volume} is being written by {holder}")]
    ConcurrentWrite { volume: Urn, holder: Urn },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The object was closed and can no longer be used.
    #[error("{0} is closed")]
    Closed(Urn),
}

pub type Aff4Result<T> = Result<T, Aff4Error>;

impl Aff4Error {
    pub fn not_found(subject: &Urn, what: impl Into<String>) -> Self {
        Self::NotFound {
            subject: subject.clone(),
            what: what.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

impl From<StoreError> for Aff4Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { subject, predicate } => Self::NotFound {
                subject,
                what: predicate,
            },
            StoreError::Sealed { subject, predicate } => Self::Integrity {
                subject: subject.to_string(),
                reason: format!("{predicate} is sealed by an identity"),
            },
            StoreError::WrongKind { .. } | StoreError::Malformed { .. } => {
                Self::CorruptArchive(e.to_string())
            }
            StoreError::Type(e) => e.into(),
        }
    }
}

impl From<ZipError> for Aff4Error {
    fn from(e: ZipError) -> Self {
        match e {
            ZipError::Io(e) => Self::Io(e),
            ZipError::CrcMismatch { ref name, .. } | ZipError::SizeMismatch { ref name, .. } => {
                Self::Integrity {
                    subject: name.clone(),
                    reason: e.to_string(),
                }
            }
            ZipError::CompressionFailed(reason) => Self::Io(io::Error::other(reason)),
            ZipError::FieldTooLong { .. } => Self::InvalidArgument(e.to_string()),
            other => Self::CorruptArchive(other.to_string()),
        }
    }
}

impl From<MapError> for Aff4Error {
    fn from(e: MapError) -> Self {
        match e {
            MapError::Malformed { .. }
            | MapError::TargetIndex { .. }
            | MapError::BinaryLength(_)
            | MapError::UnknownEncoding(_) => Self::CorruptArchive(e.to_string()),
            MapError::Unaligned { .. } | MapError::InvalidGeometry(_) => {
                Self::InvalidArgument(e.to_string())
            }
        }
    }
}

impl From<ImageError> for Aff4Error {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Io(e) => Self::Io(e),
            // Segment reads fail with our own errors; recover them intact.
            ImageError::Store(source) => match source.downcast::<Aff4Error>() {
                Ok(inner) => *inner,
                Err(other) => Self::Io(io::Error::other(other.to_string())),
            },
            ImageError::HashMismatch { .. } => Self::Integrity {
                subject: "image stream".into(),
                reason: e.to_string(),
            },
            ImageError::IndexCorrupt { .. } | ImageError::UnknownCompression(_) => {
                Self::CorruptArchive(e.to_string())
            }
            ImageError::InvalidGeometry(_) => Self::InvalidArgument(e.to_string()),
            ImageError::Compression { .. } | ImageError::WorkerPanicked { .. } => {
                Self::Io(io::Error::other(e.to_string()))
            }
        }
    }
}

impl From<TypeError> for Aff4Error {
    fn from(e: TypeError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

impl From<toml::de::Error> for Aff4Error {
    fn from(e: toml::de::Error) -> Self {
        Self::InvalidArgument(format!("config: {e}"))
    }
}
