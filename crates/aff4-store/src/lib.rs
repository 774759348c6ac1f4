//! Attribute store for AFF4 metadata.
//!
//! Every fact about an AFF4 object is a triple: (subject [`Urn`], predicate,
//! typed [`Value`]). This crate holds those triples in memory and moves them
//! in and out of the `properties` members stored inside volumes.
//!
//! # Design Rules
//!
//! 1. A (subject, predicate) pair holds an ordered list of values;
//!    first-added is first-returned.
//! 2. `set` replaces all values, `add` appends.
//! 3. Sealed pairs are write-once: `delete` is a no-op and writes fail.
//! 4. Volatile predicates never appear in exported text.
//! 5. Absence is reported as [`StoreError::NotFound`], which callers are
//!    expected to handle.
//!
//! [`Urn`]: aff4_types::Urn
//! [`Value`]: aff4_types::Value

pub mod error;
pub mod memory;
pub mod text;
pub mod traits;
pub mod triple;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryTripleStore;
pub use traits::TripleStore;
pub use triple::Triple;
