use std::ops::Range;

use crate::error::{ImageError, Result};

/// Chunk offsets of one bevy.
///
/// Encoded as one little-endian u32 per chunk followed by a trailing entry
/// holding the bevy length, so chunk `i` spans `offsets[i]..offsets[i + 1]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentIndex {
    offsets: Vec<u32>,
}

impl Default for SegmentIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self { offsets: vec![0] }
    }

    /// Record the next chunk's compressed length.
    ///
    /// Offsets are u32 on disk, so a bevy may not grow past `u32::MAX`
    /// bytes.
    pub fn push(&mut self, len: usize) -> Result<()> {
        let end = self.offsets.last().copied().unwrap_or(0);
        let next = u32::try_from(len)
            .ok()
            .and_then(|len| end.checked_add(len))
            .ok_or_else(|| {
                ImageError::InvalidGeometry(format!(
                    "bevy of {end} bytes cannot take a {len} byte chunk"
                ))
            })?;
        if self.offsets.is_empty() {
            self.offsets.push(0);
        }
        self.offsets.push(next);
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total bevy length.
    pub fn bevy_len(&self) -> u32 {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Byte range of chunk `i` within the bevy.
    pub fn chunk_range(&self, i: usize) -> Option<Range<u64>> {
        let start = *self.offsets.get(i)?;
        let end = *self.offsets.get(i + 1)?;
        (start <= end).then(|| start as u64..end as u64)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.offsets.len() * 4);
        for offset in &self.offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        out
    }

    pub fn decode(segment: u64, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 || bytes.len() < 4 {
            return Err(ImageError::IndexCorrupt {
                segment,
                reason: format!("length {} is not a positive multiple of 4", bytes.len()),
            });
        }
        let offsets: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(ImageError::IndexCorrupt {
                segment,
                reason: "offsets decrease".into(),
            });
        }
        Ok(Self { offsets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_entry_is_bevy_length() {
        let mut index = SegmentIndex::new();
        index.push(10).unwrap();
        index.push(5).unwrap();
        index.push(7).unwrap();
        assert_eq!(index.chunk_count(), 3);
        assert_eq!(index.bevy_len(), 22);
        assert_eq!(index.chunk_range(1), Some(10..15));
        assert_eq!(index.chunk_range(3), None);

        let bytes = index.encode();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[12..], &22u32.to_le_bytes());
        assert_eq!(SegmentIndex::decode(0, &bytes).unwrap(), index);
    }

    #[test]
    fn bevy_length_cannot_pass_u32() {
        let mut index = SegmentIndex::new();
        index.push(u32::MAX as usize - 10).unwrap();
        assert!(matches!(index.push(11), Err(ImageError::InvalidGeometry(_))));
        // The failed push leaves the index as it was.
        assert_eq!(index.chunk_count(), 1);
        index.push(10).unwrap();
        assert_eq!(index.bevy_len(), u32::MAX);
        assert!(index.push(usize::MAX).is_err());
    }

    #[test]
    fn corrupt_indexes() {
        assert!(SegmentIndex::decode(3, &[1, 2, 3]).is_err());
        assert!(SegmentIndex::decode(3, &[]).is_err());
        let mut bytes = 10u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            SegmentIndex::decode(3, &bytes),
            Err(ImageError::IndexCorrupt { segment: 3, .. })
        ));
    }
}
