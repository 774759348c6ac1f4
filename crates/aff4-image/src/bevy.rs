use crate::compression::ChunkCompression;
use crate::error::Result;
use crate::index::SegmentIndex;

/// Raw chunks of one segment, waiting to be compressed.
#[derive(Debug)]
pub struct Bevy {
    pub segment: u64,
    /// Chunk number of the first chunk, for error context.
    pub first_chunk: u64,
    pub chunks: Vec<Vec<u8>>,
}

/// A compressed bevy and its index, ready to be stored.
#[derive(Debug)]
pub struct CompressedBevy {
    pub segment: u64,
    pub data: Vec<u8>,
    pub index: SegmentIndex,
}

impl Bevy {
    pub fn new(segment: u64, first_chunk: u64) -> Self {
        Self {
            segment,
            first_chunk,
            chunks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn compress(self, compression: ChunkCompression) -> Result<CompressedBevy> {
        let mut data = Vec::new();
        let mut index = SegmentIndex::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            let packed = compression.compress(self.first_chunk + i as u64, chunk)?;
            index.push(packed.len())?;
            data.extend_from_slice(&packed);
        }
        Ok(CompressedBevy {
            segment: self.segment,
            data,
            index,
        })
    }
}
