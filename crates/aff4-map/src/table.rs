use aff4_types::Urn;
use serde::{Deserialize, Serialize};

use crate::error::{MapError, MapResult};

/// A breakpoint: from `image_offset` on, reads translate linearly into
/// target `target_index` starting at `target_offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapPoint {
    pub image_offset: u64,
    pub target_offset: u64,
    pub target_index: u32,
}

/// Where a read at some image offset lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapRange {
    pub target_offset: u64,
    /// Bytes readable before the mapping changes.
    pub available: u64,
    /// `None` for an unmapped gap, which reads as zeros.
    pub target_index: Option<u32>,
}

/// The point table of a map stream.
///
/// Points are kept sorted by image offset and target URNs are deduplicated,
/// so a target index stays stable once assigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapTable {
    points: Vec<MapPoint>,
    targets: Vec<Urn>,
    image_period: Option<u64>,
    target_period: u64,
    size: u64,
    block_size: u64,
}

impl Default for MapTable {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            targets: Vec::new(),
            image_period: None,
            target_period: 0,
            size: 0,
            block_size: 1,
        }
    }
}

impl MapTable {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------
    // Geometry
    // ---------------------------------------------------------------

    /// Make the table repeat every `image_period` bytes, advancing target
    /// offsets by `target_period` per repetition.
    pub fn set_period(&mut self, image_period: Option<u64>, target_period: u64) -> MapResult<()> {
        if image_period == Some(0) {
            return Err(MapError::InvalidGeometry("image period must be non-zero".into()));
        }
        self.image_period = image_period;
        self.target_period = target_period;
        Ok(())
    }

    /// Unit of serialized offsets.
    pub fn set_block_size(&mut self, block_size: u64) -> MapResult<()> {
        if block_size == 0 {
            return Err(MapError::InvalidGeometry("block size must be non-zero".into()));
        }
        self.block_size = block_size;
        Ok(())
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn image_period(&self) -> Option<u64> {
        self.image_period
    }

    pub fn target_period(&self) -> u64 {
        self.target_period
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Logical size of the map stream.
    pub fn size(&self) -> u64 {
        self.size
    }

    // ---------------------------------------------------------------
    // Points and targets
    // ---------------------------------------------------------------

    pub fn points(&self) -> &[MapPoint] {
        &self.points
    }

    pub fn targets(&self) -> &[Urn] {
        &self.targets
    }

    pub fn target(&self, index: u32) -> Option<&Urn> {
        self.targets.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index of `target`, adding it to the table if new.
    pub fn add_target(&mut self, target: &Urn) -> u32 {
        match self.targets.iter().position(|t| t == target) {
            Some(i) => i as u32,
            None => {
                self.targets.push(target.clone());
                (self.targets.len() - 1) as u32
            }
        }
    }

    /// Insert a breakpoint, replacing any point at the same image offset.
    pub fn add_point(&mut self, image_offset: u64, target_offset: u64, target: &Urn) {
        let target_index = self.add_target(target);
        self.insert_point(MapPoint {
            image_offset,
            target_offset,
            target_index,
        });
    }

    pub(crate) fn insert_point(&mut self, point: MapPoint) {
        match self
            .points
            .binary_search_by_key(&point.image_offset, |p| p.image_offset)
        {
            Ok(i) => self.points[i] = point,
            Err(i) => self.points.insert(i, point),
        }
    }

    /// Map `length` bytes at `image_offset` to `target` and grow the
    /// stream to cover them.
    pub fn add_range(&mut self, image_offset: u64, target_offset: u64, length: u64, target: &Urn) {
        self.add_point(image_offset, target_offset, target);
        self.size = self.size.max(image_offset.saturating_add(length));
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    /// Translate an image offset. `None` at or past the end of the stream.
    pub fn get_range(&self, offset: u64) -> Option<MapRange> {
        if offset >= self.size || self.points.is_empty() {
            return None;
        }
        let remaining = self.size - offset;

        let (period_number, period_offset, period_left) = match self.image_period {
            Some(period) => (offset / period, offset % period, period - offset % period),
            None => (0, offset, u64::MAX),
        };
        let shift = period_number.checked_mul(self.target_period)?;

        let (target_offset, available, target_index) = if period_offset < self.points[0].image_offset {
            // Before the first point: interpolate backward.
            let idx = self.points.partition_point(|p| p.image_offset < period_offset);
            let point = self.points[idx];
            let back = point.image_offset - period_offset;
            match point.target_offset.checked_sub(back) {
                Some(target) => (target.checked_add(shift)?, back, Some(point.target_index)),
                None => (0, back - point.target_offset, None),
            }
        } else {
            let idx = self.points.partition_point(|p| p.image_offset <= period_offset) - 1;
            let point = self.points[idx];
            let until_next = self
                .points
                .get(idx + 1)
                .map_or(u64::MAX, |next| next.image_offset - period_offset);
            let target = point
                .target_offset
                .checked_add(period_offset - point.image_offset)?
                .checked_add(shift)?;
            (target, until_next, Some(point.target_index))
        };

        Some(MapRange {
            target_offset,
            available: available.min(period_left).min(remaining),
            target_index,
        })
    }

    /// Drop points that merely continue their predecessor's linear run.
    /// Returns how many were removed.
    pub fn compact(&mut self) -> usize {
        let before = self.points.len();
        let mut kept: Vec<MapPoint> = Vec::with_capacity(before);
        for point in self.points.drain(..) {
            if kept.last().is_some_and(|run| continues(run, &point)) {
                continue;
            }
            kept.push(point);
        }
        self.points = kept;
        before - self.points.len()
    }
}

fn continues(run: &MapPoint, point: &MapPoint) -> bool {
    run.target_index == point.target_index
        && point.target_offset >= run.target_offset
        && point.image_offset - run.image_offset == point.target_offset - run.target_offset
}
