//! Map streams for AFF4.
//!
//! A map stream stores no bytes of its own. Its content is a sorted table
//! of breakpoints, each saying "from this image offset on, read the target
//! stream linearly from this target offset". An optional image period lets
//! a finite table describe an infinitely repeating layout such as a RAID
//! stripe cycle.
//!
//! # Key Types
//!
//! - [`MapTable`] -- The point table and its geometry
//! - [`MapPoint`] -- One breakpoint (image offset, target offset, target index)
//! - [`MapRange`] -- Result of [`MapTable::get_range`]
//! - [`MapEncoding`] -- Serialization tier chosen by point count

pub mod codec;
pub mod error;
pub mod table;

pub use codec::{EncodedMap, MapEncoding};
pub use error::{MapError, MapResult};
pub use table::{MapPoint, MapRange, MapTable};
