use aff4_crypto::HashAlgorithm;
use aff4_image::{ChunkCompression, ImageConfig};
use aff4_types::Urn;
use serde::{Deserialize, Serialize};

/// How a new image should be written.
#[derive(Clone, Debug, Default)]
pub struct ImageRequest {
    pub urn: Option<Urn>,
    pub chunk_size: Option<u32>,
    pub chunks_per_segment: Option<u32>,
    pub compression: Option<ChunkCompression>,
    pub hash: Option<HashAlgorithm>,
    pub encrypted: bool,
}

impl ImageRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_urn(mut self, urn: Urn) -> Self {
        self.urn = Some(urn);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_chunks_per_segment(mut self, chunks: u32) -> Self {
        self.chunks_per_segment = Some(chunks);
        self
    }

    pub fn with_compression(mut self, compression: ChunkCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Write through an encrypted stream keyed by the configured passphrase
    /// or recipients.
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Overlay the requested settings on `defaults`.
    pub fn effective_config(&self, defaults: &ImageConfig) -> ImageConfig {
        ImageConfig {
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            chunks_per_segment: self.chunks_per_segment.unwrap_or(defaults.chunks_per_segment),
            compression: self.compression.unwrap_or(defaults.compression),
            hash: self.hash.unwrap_or(defaults.hash),
            bevy_workers: defaults.bevy_workers,
        }
    }
}

/// What [`write_image`](crate::Aff4::write_image) produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub urn: Urn,
    pub size: u64,
    /// Hex digest recorded on the image; encrypted streams record theirs on
    /// the ciphertext image instead.
    pub hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder() {
        let r = ImageRequest::new()
            .with_chunk_size(4096)
            .with_compression(ChunkCompression::Stored)
            .encrypted();
        assert_eq!(r.chunk_size, Some(4096));
        assert!(r.encrypted);
        assert!(r.urn.is_none());
    }

    #[test]
    fn unset_fields_keep_defaults() {
        let defaults = ImageConfig::default();
        let config = ImageRequest::new().with_chunks_per_segment(4).effective_config(&defaults);
        assert_eq!(config.chunks_per_segment, 4);
        assert_eq!(config.chunk_size, defaults.chunk_size);
        assert_eq!(config.compression, defaults.compression);
        assert_eq!(config.hash, defaults.hash);
    }
}
