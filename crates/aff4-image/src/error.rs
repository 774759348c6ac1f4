use std::io;

/// Errors produced by the image stream codec.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Compressing a chunk failed.
    #[error("compression of chunk {chunk} failed: {reason}")]
    Compression { chunk: u64, reason: String },

    /// A segment index member is malformed.
    #[error("segment {segment} index is corrupt: {reason}")]
    IndexCorrupt { segment: u64, reason: String },

    /// A bevy worker thread panicked.
    #[error("bevy worker for segment {segment} panicked")]
    WorkerPanicked { segment: u64 },

    /// Chunk geometry is unusable.
    #[error("invalid image geometry: {0}")]
    InvalidGeometry(String),

    #[error("unknown compression: {0}")]
    UnknownCompression(String),

    /// Reading or writing segment members failed.
    #[error("segment store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The stored content hash does not match the stream.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}

/// Convenience alias used throughout the image crate.
pub type Result<T> = std::result::Result<T, ImageError>;
