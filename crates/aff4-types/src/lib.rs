//! Foundation types for AFF4 evidence containers.
//!
//! Every other AFF4 crate depends on `aff4-types`. It defines how objects are
//! named, what an attribute value looks like, and the text codecs used when
//! metadata is serialized into a volume.
//!
//! # Key Types
//!
//! - [`Urn`]: globally unique identifier for volumes, streams, links and identities
//! - [`Value`]: typed attribute value (string, URN, 32/64-bit integer, binary)
//! - [`ValueKind`]: the registered kind of a predicate's values
//! - [`predicates`]: the attribute vocabulary shared by all layers
//! - [`codec`]: base16/32/64, integer and size-string parsing

pub mod codec;
pub mod error;
pub mod predicates;
pub mod urn;
pub mod value;

pub use error::TypeError;
pub use urn::Urn;
pub use value::{Value, ValueKind};
