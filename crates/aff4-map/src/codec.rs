//! Serialized forms of a map.
//!
//! | Points | Encoding | Where |
//! | ------ | -------- | ----- |
//! | 0-1    | inline   | `image,target,urn` records joined by `|` in `aff4:map_inline` |
//! | 2-10   | text     | one record per line in the `{urn}/map` member |
//! | > 10   | binary   | 20-byte records in `{urn}/map.bin`, targets in `{urn}/map.targets` |
//!
//! Offsets are written in units of the map's block size.

use std::fmt;
use std::str::FromStr;

use aff4_types::Urn;
use serde::{Deserialize, Serialize};

use crate::error::{MapError, MapResult};
use crate::table::{MapPoint, MapTable};

/// Size of one binary record: u64 image, u64 target, u32 target index.
pub const RECORD_LEN: usize = 20;

/// Largest table still stored inline.
pub const MAX_INLINE_POINTS: usize = 1;

/// Largest table still stored as a text member.
pub const MAX_TEXT_POINTS: usize = 10;

const INLINE_SEPARATOR: char = '|';
const TEXT_SEPARATOR: char = '\n';

/// Serialization tier of a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapEncoding {
    Inline,
    Text,
    Binary,
}

impl MapEncoding {
    pub fn for_point_count(points: usize) -> Self {
        match points {
            0..=MAX_INLINE_POINTS => Self::Inline,
            n if n <= MAX_TEXT_POINTS => Self::Text,
            _ => Self::Binary,
        }
    }

    /// The name recorded in `aff4:map_encoding`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for MapEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MapEncoding {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inline" => Ok(Self::Inline),
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            other => Err(MapError::UnknownEncoding(other.to_string())),
        }
    }
}

/// A serialized map, ready to be stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncodedMap {
    Inline(String),
    Text(String),
    Binary { records: Vec<u8>, targets: String },
}

impl EncodedMap {
    pub fn encoding(&self) -> MapEncoding {
        match self {
            Self::Inline(_) => MapEncoding::Inline,
            Self::Text(_) => MapEncoding::Text,
            Self::Binary { .. } => MapEncoding::Binary,
        }
    }
}

impl MapTable {
    /// Compact and serialize in the tier matching the point count.
    pub fn encode(&mut self) -> MapResult<EncodedMap> {
        let elided = self.compact();
        let encoding = MapEncoding::for_point_count(self.len());
        tracing::debug!(points = self.len(), elided, %encoding, "encoding map");
        Ok(match encoding {
            MapEncoding::Inline => EncodedMap::Inline(self.encode_records(INLINE_SEPARATOR)?),
            MapEncoding::Text => EncodedMap::Text(self.encode_records(TEXT_SEPARATOR)?),
            MapEncoding::Binary => {
                let (records, targets) = self.encode_binary()?;
                EncodedMap::Binary { records, targets }
            }
        })
    }

    pub fn decode_inline(&mut self, text: &str) -> MapResult<()> {
        self.decode_records(text, INLINE_SEPARATOR)
    }

    pub fn decode_text(&mut self, text: &str) -> MapResult<()> {
        self.decode_records(text, TEXT_SEPARATOR)
    }

    fn offset_in_blocks(&self, offset: u64) -> MapResult<u64> {
        if offset % self.block_size() != 0 {
            return Err(MapError::Unaligned {
                offset,
                block_size: self.block_size(),
            });
        }
        Ok(offset / self.block_size())
    }

    fn offset_from_blocks(&self, blocks: u64, record: usize) -> MapResult<u64> {
        blocks
            .checked_mul(self.block_size())
            .ok_or_else(|| MapError::Malformed {
                record,
                reason: format!("offset {blocks} overflows at block size {}", self.block_size()),
            })
    }

    fn encode_records(&self, separator: char) -> MapResult<String> {
        let mut out = String::new();
        for (i, point) in self.points().iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            let target = self.target(point.target_index).ok_or(MapError::TargetIndex {
                index: point.target_index,
                targets: self.targets().len(),
            })?;
            out.push_str(&format!(
                "{},{},{}",
                self.offset_in_blocks(point.image_offset)?,
                self.offset_in_blocks(point.target_offset)?,
                target
            ));
        }
        Ok(out)
    }

    fn decode_records(&mut self, text: &str, separator: char) -> MapResult<()> {
        for (record, raw) in text.split(separator).enumerate() {
            let raw = raw.trim_end_matches('\r');
            if raw.trim().is_empty() {
                continue;
            }
            let malformed = |reason: &str| MapError::Malformed {
                record,
                reason: reason.to_string(),
            };
            let mut fields = raw.splitn(3, ',');
            let image: u64 = fields
                .next()
                .and_then(|f| f.trim().parse().ok())
                .ok_or_else(|| malformed("bad image offset"))?;
            let target: u64 = fields
                .next()
                .and_then(|f| f.trim().parse().ok())
                .ok_or_else(|| malformed("bad target offset"))?;
            let urn = fields
                .next()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| malformed("missing target"))?;
            let image = self.offset_from_blocks(image, record)?;
            let target = self.offset_from_blocks(target, record)?;
            self.add_point(image, target, &Urn::from(urn));
        }
        Ok(())
    }

    fn encode_binary(&self) -> MapResult<(Vec<u8>, String)> {
        let mut records = Vec::with_capacity(self.len() * RECORD_LEN);
        for point in self.points() {
            records.extend_from_slice(&self.offset_in_blocks(point.image_offset)?.to_le_bytes());
            records.extend_from_slice(&self.offset_in_blocks(point.target_offset)?.to_le_bytes());
            records.extend_from_slice(&point.target_index.to_le_bytes());
        }
        let mut targets = String::new();
        for target in self.targets() {
            targets.push_str(target.as_str());
            targets.push('\n');
        }
        Ok((records, targets))
    }

    /// Load binary records and their target table.
    pub fn decode_binary(&mut self, records: &[u8], targets: &str) -> MapResult<()> {
        if records.len() % RECORD_LEN != 0 {
            return Err(MapError::BinaryLength(records.len()));
        }
        let remap: Vec<u32> = targets
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| self.add_target(&Urn::from(l)))
            .collect();

        for (record, chunk) in records.chunks_exact(RECORD_LEN).enumerate() {
            let image = le_u64(&chunk[0..8]);
            let target = le_u64(&chunk[8..16]);
            let index = u32::from_le_bytes([chunk[16], chunk[17], chunk[18], chunk[19]]);
            let target_index = *remap.get(index as usize).ok_or(MapError::TargetIndex {
                index,
                targets: remap.len(),
            })?;
            let point = MapPoint {
                image_offset: self.offset_from_blocks(image, record)?,
                target_offset: self.offset_from_blocks(target, record)?,
                target_index,
            };
            self.insert_point(point);
        }
        Ok(())
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    u64::from_le_bytes(arr)
}
