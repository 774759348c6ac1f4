//! Image streams: chunked, compressed, hashed byte streams stored as
//! segment members of a volume.

use std::fmt;
use std::ops::Range;

use aff4_crypto::HashAlgorithm;
use aff4_image::{
    index_member_name, segment_member_name, BevySink, BevySource, ChunkCompression,
    CompressedBevy, ImageConfig, ImageError, ImageGeometry, ImageReader, ImageSummary, ImageWriter,
};
use aff4_store::TripleStore;
use aff4_types::predicates::{
    CHUNKS_IN_SEGMENT, CHUNK_SIZE, COMPRESSION, HASH, HASH_TYPE, SIZE, STORED,
};
use aff4_types::Urn;
use aff4_zip::ZipCompression;
use tracing::info;

use crate::error::{Aff4Error, Aff4Result};
use crate::object::{OpenMode, Stream};
use crate::resolver::Resolver;

/// An image stream, either being written or open for reading.
pub struct ImageStream {
    urn: Urn,
    volume: Urn,
    writer: Option<ImageWriter>,
    reader: Option<ImageReader>,
    position: u64,
}

impl ImageStream {
    pub(crate) fn create(resolver: &Resolver, urn: &Urn) -> Aff4Result<Self> {
        Self::create_with(resolver, urn, resolver.config().image.clone())
    }

    pub(crate) fn create_with(resolver: &Resolver, urn: &Urn, config: ImageConfig) -> Aff4Result<Self> {
        let volume = resolver.store().resolve_urn(urn, STORED)?;
        let writer = ImageWriter::new(config)?;
        Ok(Self {
            urn: urn.clone(),
            volume,
            writer: Some(writer),
            reader: None,
            position: 0,
        })
    }

    pub(crate) fn open(resolver: &Resolver, urn: &Urn, mode: OpenMode) -> Aff4Result<Self> {
        if mode == OpenMode::Write {
            return Err(Aff4Error::InvalidArgument(format!(
                "image {urn} is already written; create a new stream instead"
            )));
        }
        let store = resolver.store();
        let volume = store.resolve_urn(urn, STORED)?;
        let geometry = ImageGeometry {
            chunk_size: u32_attr(store.resolve_u64(urn, CHUNK_SIZE)?, CHUNK_SIZE)?,
            chunks_per_segment: u32_attr(store.resolve_u64(urn, CHUNKS_IN_SEGMENT)?, CHUNKS_IN_SEGMENT)?,
            compression: store.resolve_string(urn, COMPRESSION)?.parse::<ChunkCompression>()?,
            size: store.resolve_u64(urn, SIZE)?,
        };
        let reader = ImageReader::new(geometry, resolver.config().chunk_cache_capacity)?;
        Ok(Self {
            urn: urn.clone(),
            volume,
            writer: None,
            reader: Some(reader),
            position: 0,
        })
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn volume(&self) -> &Urn {
        &self.volume
    }

    /// Flush remaining chunks and record size, hash and geometry.
    pub fn close(&mut self, resolver: &Resolver) -> Aff4Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let mut sink = SegmentStore {
            resolver,
            image: &self.urn,
            volume: &self.volume,
        };
        let summary = writer.finish(&mut sink)?;
        self.record(resolver, &summary)?;
        info!(image = %self.urn, size = summary.size, segments = summary.segments, "image closed");
        Ok(())
    }

    fn record(&self, resolver: &Resolver, summary: &ImageSummary) -> Aff4Result<()> {
        resolver.set(&self.urn, SIZE, summary.size)?;
        resolver.set(&self.urn, HASH, summary.hash.as_str())?;
        resolver.set(&self.urn, HASH_TYPE, summary.hash_algorithm.name())?;
        resolver.set(&self.urn, CHUNK_SIZE, summary.chunk_size as i32)?;
        resolver.set(&self.urn, CHUNKS_IN_SEGMENT, summary.chunks_per_segment as i32)?;
        resolver.set(&self.urn, COMPRESSION, summary.compression.name())?;
        Ok(())
    }

    /// Re-read every chunk and compare with the recorded hash.
    pub fn verify(&mut self, resolver: &Resolver) -> Aff4Result<()> {
        let store = resolver.store();
        let expected = store.resolve_string(&self.urn, HASH)?;
        let algorithm: HashAlgorithm = store.resolve_string(&self.urn, HASH_TYPE)?.parse()?;
        let source = SegmentStore {
            resolver,
            image: &self.urn,
            volume: &self.volume,
        };
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Aff4Error::InvalidArgument(format!("image {} is being written", self.urn)))?;
        reader
            .verify(algorithm, &expected, &source)
            .map_err(|e| match e {
                ImageError::HashMismatch { expected, actual } => Aff4Error::Integrity {
                    subject: self.urn.to_string(),
                    reason: format!("hash mismatch: recorded {expected}, computed {actual}"),
                },
                other => other.into(),
            })
    }
}

impl Stream for ImageStream {
    fn size(&self, _: &Resolver) -> Aff4Result<u64> {
        Ok(match (&self.writer, &self.reader) {
            (Some(writer), _) => writer.size(),
            (None, Some(reader)) => reader.size(),
            (None, None) => 0,
        })
    }

    fn read_at(&mut self, resolver: &Resolver, offset: u64, buf: &mut [u8]) -> Aff4Result<usize> {
        let source = SegmentStore {
            resolver,
            image: &self.urn,
            volume: &self.volume,
        };
        let Some(reader) = self.reader.as_mut() else {
            return Err(Aff4Error::InvalidArgument(format!(
                "image {} cannot be read while it is written",
                self.urn
            )));
        };
        Ok(reader.read_at(offset, buf, &source)?)
    }

    fn write(&mut self, resolver: &Resolver, data: &[u8]) -> Aff4Result<usize> {
        let mut sink = SegmentStore {
            resolver,
            image: &self.urn,
            volume: &self.volume,
        };
        let Some(writer) = self.writer.as_mut() else {
            return Err(Aff4Error::InvalidArgument(format!("image {} is read-only", self.urn)));
        };
        let n = writer.write(data, &mut sink)?;
        self.position = writer.size();
        Ok(n)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
    }
}

impl fmt::Debug for ImageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageStream")
            .field("urn", &self.urn)
            .field("volume", &self.volume)
            .field("writing", &self.writer.is_some())
            .field("position", &self.position)
            .finish()
    }
}

/// Segment and index members of one image, reached through the resolver.
struct SegmentStore<'a> {
    resolver: &'a Resolver,
    image: &'a Urn,
    volume: &'a Urn,
}

impl SegmentStore<'_> {
    fn segment(&self, segment: u64) -> Urn {
        self.image.join(&segment_member_name(segment))
    }

    fn index(&self, segment: u64) -> Urn {
        self.image.join(&index_member_name(segment))
    }
}

fn missing_as_none<T>(result: Aff4Result<T>) -> aff4_image::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(ImageError::Store(Box::new(e))),
    }
}

impl BevySink for SegmentStore<'_> {
    fn store_bevy(&mut self, bevy: &CompressedBevy) -> aff4_image::Result<()> {
        let store = |member: Urn, data: &[u8]| {
            self.resolver
                .write_member(self.volume, &member, data, ZipCompression::Stored)
                .map(|_| ())
                .map_err(|e| ImageError::Store(Box::new(e)))
        };
        store(self.segment(bevy.segment), &bevy.data)?;
        store(self.index(bevy.segment), &bevy.index.encode())
    }
}

impl BevySource for SegmentStore<'_> {
    fn read_index(&self, segment: u64) -> aff4_image::Result<Option<Vec<u8>>> {
        missing_as_none(self.resolver.read_member(&self.index(segment)).map(|data| data.to_vec()))
    }

    fn read_bevy_range(&self, segment: u64, range: Range<u64>) -> aff4_image::Result<Option<Vec<u8>>> {
        missing_as_none(self.resolver.read_member_range(&self.segment(segment), range))
    }
}

fn u32_attr(value: u64, predicate: &str) -> Aff4Result<u32> {
    u32::try_from(value)
        .map_err(|_| Aff4Error::CorruptArchive(format!("{predicate} out of range: {value}")))
}
