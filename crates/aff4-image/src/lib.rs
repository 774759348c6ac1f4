//! Chunked image streams for AFF4.
//!
//! An image stream splits its input into fixed-size chunks and compresses
//! each one independently. Consecutive chunks are batched into a *bevy*,
//! stored as one volume member `{urn}/{segment:08}` with a companion index
//! member `{urn}/{segment:08}.idx` holding the little-endian u32 offset of
//! every chunk plus one trailing entry (the bevy length).
//!
//! Writing hands full bevies to a bounded pool of worker threads; reading
//! locates a chunk by arithmetic, fetches only its byte range and keeps
//! recently used chunks in an LRU cache. Chunks that cannot be decoded read
//! as zeros so that damaged evidence stays partially recoverable.

pub mod bevy;
pub mod compression;
pub mod error;
pub mod index;
pub mod pool;
pub mod reader;
pub mod store;
pub mod writer;

pub use bevy::{Bevy, CompressedBevy};
pub use compression::ChunkCompression;
pub use error::{ImageError, Result};
pub use index::SegmentIndex;
pub use pool::BevyPool;
pub use reader::{ImageGeometry, ImageReader};
pub use store::{index_member_name, segment_member_name, BevySink, BevySource};
pub use writer::{ImageConfig, ImageSummary, ImageWriter};
