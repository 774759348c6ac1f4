use aff4_crypto::{HashAlgorithm, StreamHasher};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bevy::{Bevy, CompressedBevy};
use crate::compression::ChunkCompression;
use crate::error::{ImageError, Result};
use crate::pool::BevyPool;
use crate::store::BevySink;

/// Settings for newly written image streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub chunk_size: u32,
    pub chunks_per_segment: u32,
    pub compression: ChunkCompression,
    pub hash: HashAlgorithm,
    /// Threads compressing bevies concurrently; 0 compresses inline.
    pub bevy_workers: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32 * 1024,
            chunks_per_segment: 2048,
            compression: ChunkCompression::Zlib,
            hash: HashAlgorithm::Sha256,
            bevy_workers: 3,
        }
    }
}

impl ImageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ImageError::InvalidGeometry("chunk_size must be non-zero".into()));
        }
        if self.chunks_per_segment == 0 {
            return Err(ImageError::InvalidGeometry(
                "chunks_per_segment must be non-zero".into(),
            ));
        }
        // Segment indexes hold u32 offsets.
        let bevy = u64::from(self.chunk_size) * u64::from(self.chunks_per_segment);
        if bevy > u64::from(u32::MAX) {
            return Err(ImageError::InvalidGeometry(format!(
                "{} chunks of {} bytes make a {bevy} byte bevy, over the 4 GiB limit",
                self.chunks_per_segment, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// What a finished stream records about itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSummary {
    pub size: u64,
    pub hash_algorithm: HashAlgorithm,
    /// Hex digest of the uncompressed bytes.
    pub hash: String,
    pub segments: u64,
    pub chunk_size: u32,
    pub chunks_per_segment: u32,
    pub compression: ChunkCompression,
}

/// Sequential writer of one image stream.
///
/// Bytes accumulate into a chunk buffer; full chunks join the current bevy
/// and full bevies go to the worker pool. Segment numbers follow chunk
/// numbers, so only the final bevy may be short.
pub struct ImageWriter {
    config: ImageConfig,
    chunk: Vec<u8>,
    bevy: Bevy,
    next_chunk: u64,
    size: u64,
    hasher: StreamHasher,
    pool: BevyPool,
    segments_stored: u64,
}

impl ImageWriter {
    pub fn new(config: ImageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunk: Vec::with_capacity(config.chunk_size as usize),
            bevy: Bevy::new(0, 0),
            next_chunk: 0,
            size: 0,
            hasher: StreamHasher::new(config.hash),
            pool: BevyPool::new(config.bevy_workers, config.compression),
            segments_stored: 0,
            config,
        })
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn write(&mut self, mut data: &[u8], sink: &mut dyn BevySink) -> Result<usize> {
        let written = data.len();
        self.hasher.update(data);
        self.size += written as u64;

        let chunk_size = self.config.chunk_size as usize;
        while !data.is_empty() {
            let take = (chunk_size - self.chunk.len()).min(data.len());
            self.chunk.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.chunk.len() == chunk_size {
                self.push_chunk(sink)?;
            }
        }
        Ok(written)
    }

    /// Store every bevy the workers have finished so far.
    pub fn flush(&mut self, sink: &mut dyn BevySink) -> Result<()> {
        let done = self.pool.drain()?;
        self.store_all(done, sink)
    }

    /// Write the trailing partial chunk and bevy, join all workers.
    pub fn finish(mut self, sink: &mut dyn BevySink) -> Result<ImageSummary> {
        if !self.chunk.is_empty() {
            self.push_chunk(sink)?;
        }
        if !self.bevy.is_empty() {
            self.submit_bevy(sink)?;
        }
        self.flush(sink)?;

        let summary = ImageSummary {
            size: self.size,
            hash_algorithm: self.config.hash,
            hash: self.hasher.finalize_hex(),
            segments: self.segments_stored,
            chunk_size: self.config.chunk_size,
            chunks_per_segment: self.config.chunks_per_segment,
            compression: self.config.compression,
        };
        info!(
            size = summary.size,
            segments = summary.segments,
            hash = %summary.hash,
            "image stream finished"
        );
        Ok(summary)
    }

    fn push_chunk(&mut self, sink: &mut dyn BevySink) -> Result<()> {
        let chunk = std::mem::replace(
            &mut self.chunk,
            Vec::with_capacity(self.config.chunk_size as usize),
        );
        self.bevy.chunks.push(chunk);
        self.next_chunk += 1;
        if self.bevy.len() == self.config.chunks_per_segment as usize {
            self.submit_bevy(sink)?;
        }
        Ok(())
    }

    fn submit_bevy(&mut self, sink: &mut dyn BevySink) -> Result<()> {
        let next_segment = self.next_chunk / self.config.chunks_per_segment as u64;
        let bevy = std::mem::replace(&mut self.bevy, Bevy::new(next_segment, self.next_chunk));
        let done = self.pool.submit(bevy)?;
        self.store_all(done, sink)
    }

    fn store_all(&mut self, done: Vec<CompressedBevy>, sink: &mut dyn BevySink) -> Result<()> {
        for bevy in done {
            sink.store_bevy(&bevy)?;
            self.segments_stored += 1;
            debug!(segment = bevy.segment, len = bevy.data.len(), "stored bevy");
        }
        Ok(())
    }
}
