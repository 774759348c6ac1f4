use std::ops::Range;

use crate::bevy::CompressedBevy;
use crate::error::Result;

/// Member name of a segment's data, relative to the stream URN.
pub fn segment_member_name(segment: u64) -> String {
    format!("{segment:08}")
}

/// Member name of a segment's chunk index, relative to the stream URN.
pub fn index_member_name(segment: u64) -> String {
    format!("{segment:08}.idx")
}

/// Where an image writer puts finished bevies.
pub trait BevySink {
    /// Persist the bevy data and its encoded index.
    fn store_bevy(&mut self, bevy: &CompressedBevy) -> Result<()>;
}

/// Where an image reader fetches bevy bytes from.
pub trait BevySource {
    /// The encoded index of `segment`, or `None` when it is missing.
    fn read_index(&self, segment: u64) -> Result<Option<Vec<u8>>>;

    /// A byte range of the segment's data, or `None` when the segment or
    /// the range is missing.
    fn read_bevy_range(&self, segment: u64, range: Range<u64>) -> Result<Option<Vec<u8>>>;
}

/// In-memory sink and source, keyed by segment number.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemoryBevies {
    pub segments: std::collections::BTreeMap<u64, (Vec<u8>, Vec<u8>)>,
}

#[cfg(test)]
impl BevySink for MemoryBevies {
    fn store_bevy(&mut self, bevy: &CompressedBevy) -> Result<()> {
        self.segments
            .insert(bevy.segment, (bevy.data.clone(), bevy.index.encode()));
        Ok(())
    }
}

#[cfg(test)]
impl BevySource for MemoryBevies {
    fn read_index(&self, segment: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.segments.get(&segment).map(|(_, idx)| idx.clone()))
    }

    fn read_bevy_range(&self, segment: u64, range: Range<u64>) -> Result<Option<Vec<u8>>> {
        Ok(self
            .segments
            .get(&segment)
            .and_then(|(data, _)| data.get(range.start as usize..range.end as usize))
            .map(<[u8]>::to_vec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_names_are_zero_padded() {
        assert_eq!(segment_member_name(0), "00000000");
        assert_eq!(segment_member_name(79), "00000079");
        assert_eq!(index_member_name(12), "00000012.idx");
    }
}
