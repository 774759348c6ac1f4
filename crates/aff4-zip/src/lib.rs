//! ZIP container layer for AFF4 volumes.
//!
//! Only the subset of ZIP that AFF4 needs is implemented, but what is
//! written stays readable by ordinary ZIP tools.
//!
//! # Architecture
//!
//! - **Member names** (`escape`): URNs are percent-escaped so they survive as entry names
//! - **Headers** (`header`): local, central, data descriptor, EOCD and Zip64 records
//! - **Directory** (`directory`): EOCD scan, central directory walk and rewrite
//! - **MemberEncoder**: streams one member as header, data and descriptor bytes
//!   without knowing its size in advance
//! - **decode_member**: decompresses a member and verifies its CRC32
//!
//! The crate never owns the backing stream. Encoders hand back bytes and the
//! caller writes them at its own watermark.

pub mod directory;
pub mod dostime;
pub mod entry;
pub mod error;
pub mod escape;
pub mod header;
pub mod member;

pub use directory::{read_directory, write_directory, Directory};
pub use entry::{MemberEntry, ZipCompression};
pub use error::{ZipError, ZipResult};
pub use escape::{escape_name, unescape_name};
pub use member::{decode_member, read_member, MemberEncoder};
