use std::num::NonZeroUsize;
use std::sync::Arc;

use aff4_crypto::{HashAlgorithm, StreamHasher};
use lru::LruCache;
use tracing::{debug, warn};

use crate::compression::ChunkCompression;
use crate::error::{ImageError, Result};
use crate::index::SegmentIndex;
use crate::store::BevySource;

/// Bytes hashed per step by [`ImageReader::verify`].
const VERIFY_STEP: usize = 1 << 20;

/// Layout of a stored image stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageGeometry {
    pub chunk_size: u32,
    pub chunks_per_segment: u32,
    pub compression: ChunkCompression,
    pub size: u64,
}

impl ImageGeometry {
    /// Segment holding `chunk` and the chunk's position inside it.
    pub fn locate(&self, chunk: u64) -> (u64, usize) {
        let per = self.chunks_per_segment as u64;
        (chunk / per, (chunk % per) as usize)
    }

    /// Uncompressed length of `chunk`; the last one may be short.
    pub fn chunk_len(&self, chunk: u64) -> usize {
        let start = chunk * self.chunk_size as u64;
        self.size.saturating_sub(start).min(self.chunk_size as u64) as usize
    }
}

/// Random-access reader over a stored image stream.
pub struct ImageReader {
    geometry: ImageGeometry,
    chunks: LruCache<u64, Arc<[u8]>>,
    indexes: LruCache<u64, Option<Arc<SegmentIndex>>>,
}

impl ImageReader {
    pub fn new(geometry: ImageGeometry, cache_capacity: usize) -> Result<Self> {
        if geometry.chunk_size == 0 || geometry.chunks_per_segment == 0 {
            return Err(ImageError::InvalidGeometry(format!("{geometry:?}")));
        }
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            geometry,
            chunks: LruCache::new(capacity),
            indexes: LruCache::new(capacity),
        })
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    pub fn size(&self) -> u64 {
        self.geometry.size
    }

    /// Fill `buf` from `offset`; returns the bytes read, 0 at end of stream.
    pub fn read_at(
        &mut self,
        offset: u64,
        buf: &mut [u8],
        source: &dyn BevySource,
    ) -> Result<usize> {
        let chunk_size = self.geometry.chunk_size as u64;
        let end = self.geometry.size.min(offset.saturating_add(buf.len() as u64));
        let mut pos = offset;
        while pos < end {
            let chunk_id = pos / chunk_size;
            let within = (pos % chunk_size) as usize;
            let chunk = self.read_chunk(chunk_id, source)?;
            let take = (chunk.len() - within).min((end - pos) as usize);
            let at = (pos - offset) as usize;
            buf[at..at + take].copy_from_slice(&chunk[within..within + take]);
            pos += take as u64;
        }
        Ok((end.saturating_sub(offset)) as usize)
    }

    /// One decompressed chunk. Undecodable chunks read as zeros.
    pub fn read_chunk(&mut self, chunk_id: u64, source: &dyn BevySource) -> Result<Arc<[u8]>> {
        if let Some(chunk) = self.chunks.get(&chunk_id) {
            return Ok(Arc::clone(chunk));
        }
        let expected = self.geometry.chunk_len(chunk_id);
        let (segment, position) = self.geometry.locate(chunk_id);

        let data = match self.fetch_chunk(segment, position, expected, source)? {
            Some(data) => data,
            None => {
                warn!(chunk = chunk_id, segment, "chunk unreadable, substituting zeros");
                vec![0; expected]
            }
        };
        let chunk: Arc<[u8]> = data.into();
        self.chunks.put(chunk_id, Arc::clone(&chunk));
        Ok(chunk)
    }

    fn fetch_chunk(
        &mut self,
        segment: u64,
        position: usize,
        expected: usize,
        source: &dyn BevySource,
    ) -> Result<Option<Vec<u8>>> {
        let Some(index) = self.segment_index(segment, source)? else {
            return Ok(None);
        };
        let Some(range) = index.chunk_range(position) else {
            return Ok(None);
        };
        let Some(packed) = source.read_bevy_range(segment, range)? else {
            return Ok(None);
        };
        Ok(self.geometry.compression.decompress(&packed, expected))
    }

    fn segment_index(
        &mut self,
        segment: u64,
        source: &dyn BevySource,
    ) -> Result<Option<Arc<SegmentIndex>>> {
        if let Some(index) = self.indexes.get(&segment) {
            return Ok(index.clone());
        }
        let index = match source.read_index(segment)? {
            None => None,
            Some(bytes) => match SegmentIndex::decode(segment, &bytes) {
                Ok(index) => Some(Arc::new(index)),
                Err(e) => {
                    warn!(segment, error = %e, "segment index unusable");
                    None
                }
            },
        };
        debug!(segment, present = index.is_some(), "loaded segment index");
        self.indexes.put(segment, index.clone());
        Ok(index)
    }

    /// Hash the whole stream.
    pub fn digest(&mut self, algorithm: HashAlgorithm, source: &dyn BevySource) -> Result<String> {
        let mut hasher = StreamHasher::new(algorithm);
        let mut buf = vec![0u8; VERIFY_STEP];
        let mut offset = 0;
        loop {
            let n = self.read_at(offset, &mut buf, source)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            offset += n as u64;
        }
        Ok(hasher.finalize_hex())
    }

    /// Re-read the stream and compare against a stored hex digest.
    pub fn verify(
        &mut self,
        algorithm: HashAlgorithm,
        expected: &str,
        source: &dyn BevySource,
    ) -> Result<()> {
        let actual = self.digest(algorithm, source)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(ImageError::HashMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBevies;
    use crate::writer::{ImageConfig, ImageWriter};
    use proptest::prelude::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 253) as u8).collect()
    }

    fn write_image(data: &[u8], config: ImageConfig) -> (MemoryBevies, ImageReader, String) {
        let mut sink = MemoryBevies::default();
        let mut writer = ImageWriter::new(config.clone()).unwrap();
        writer.write(data, &mut sink).unwrap();
        let summary = writer.finish(&mut sink).unwrap();
        let geometry = ImageGeometry {
            chunk_size: config.chunk_size,
            chunks_per_segment: config.chunks_per_segment,
            compression: config.compression,
            size: summary.size,
        };
        (sink, ImageReader::new(geometry, 8).unwrap(), summary.hash)
    }

    fn config(chunk_size: u32, per: u32, compression: ChunkCompression) -> ImageConfig {
        ImageConfig {
            chunk_size,
            chunks_per_segment: per,
            compression,
            ..ImageConfig::default()
        }
    }

    #[test]
    fn spanning_reads_are_contiguous() {
        let data = pattern(1000);
        let (source, mut reader, _) = write_image(&data, config(64, 3, ChunkCompression::Zlib));
        let mut buf = vec![0u8; 300];
        assert_eq!(reader.read_at(50, &mut buf, &source).unwrap(), 300);
        assert_eq!(buf, data[50..350]);

        let mut tail = vec![0u8; 100];
        assert_eq!(reader.read_at(950, &mut tail, &source).unwrap(), 50);
        assert_eq!(&tail[..50], &data[950..]);
        assert_eq!(reader.read_at(1000, &mut tail, &source).unwrap(), 0);
    }

    #[test]
    fn damaged_chunk_reads_as_zeros() {
        let data = pattern(256);
        let (mut source, mut reader, _) = write_image(&data, config(64, 2, ChunkCompression::Zlib));
        // Corrupt chunk 1 (segment 0) and drop segment 1 entirely.
        let (bevy, idx) = source.segments.get_mut(&0).unwrap();
        let index = SegmentIndex::decode(0, idx).unwrap();
        let r = index.chunk_range(1).unwrap();
        for b in &mut bevy[r.start as usize..r.end as usize] {
            *b = 0xff;
        }
        source.segments.remove(&1);

        let mut buf = vec![0u8; 256];
        assert_eq!(reader.read_at(0, &mut buf, &source).unwrap(), 256);
        assert_eq!(&buf[..64], &data[..64]);
        assert!(buf[64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn verify_detects_substitution() {
        let data = pattern(500);
        let (mut source, mut reader, hash) = write_image(&data, config(100, 2, ChunkCompression::Zstd));
        reader.verify(HashAlgorithm::Sha256, &hash, &source).unwrap();

        source.segments.remove(&2);
        let mut fresh = ImageReader::new(*reader.geometry(), 4).unwrap();
        assert!(matches!(
            fresh.verify(HashAlgorithm::Sha256, &hash, &source),
            Err(ImageError::HashMismatch { .. })
        ));
    }

    #[test]
    fn ten_mib_in_80_segments() {
        let data = pattern(10 << 20);
        let (source, mut reader, _) =
            write_image(&data, config(32 * 1024, 4, ChunkCompression::Zlib));
        assert_eq!(source.segments.len(), 80);
        let mut buf = vec![0u8; data.len()];
        assert_eq!(reader.read_at(0, &mut buf, &source).unwrap(), data.len());
        assert!(buf == data);
    }

    #[test]
    fn source_errors_propagate() {
        struct Failing;
        impl BevySource for Failing {
            fn read_index(&self, _: u64) -> Result<Option<Vec<u8>>> {
                Err(ImageError::Store("volume gone".into()))
            }
            fn read_bevy_range(&self, _: u64, _: std::ops::Range<u64>) -> Result<Option<Vec<u8>>> {
                unreachable!()
            }
        }
        let geometry = ImageGeometry {
            chunk_size: 16,
            chunks_per_segment: 2,
            compression: ChunkCompression::Stored,
            size: 32,
        };
        let mut reader = ImageReader::new(geometry, 2).unwrap();
        assert!(reader.read_at(0, &mut [0u8; 4], &Failing).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn roundtrip_any_geometry(
            len in 0usize..5000,
            chunk_size in 1u32..300,
            per in 1u32..6,
            workers in 0usize..4,
            method in 0usize..3,
            offset in 0u64..5000,
            read_len in 0usize..2000,
        ) {
            let compression = [ChunkCompression::Stored, ChunkCompression::Zlib, ChunkCompression::Zstd][method];
            let data = pattern(len);
            let mut cfg = config(chunk_size, per, compression);
            cfg.bevy_workers = workers;
            let (source, mut reader, _) = write_image(&data, cfg);

            let mut whole = vec![0u8; len];
            prop_assert_eq!(reader.read_at(0, &mut whole, &source).unwrap(), len);
            prop_assert_eq!(&whole, &data);

            let mut buf = vec![0u8; read_len];
            let n = reader.read_at(offset, &mut buf, &source).unwrap();
            let start = (offset as usize).min(len);
            let expect = &data[start..(start + read_len).min(len)];
            prop_assert_eq!(&buf[..n], expect);
        }
    }
}
