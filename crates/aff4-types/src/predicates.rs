//! The attribute vocabulary.
//!
//! Predicates are namespaced strings. Each has a registered [`ValueKind`] so
//! that the properties text format can restore typed values; predicates not
//! listed here hold strings. Everything under [`VOLATILE_NAMESPACE`] is
//! process-local bookkeeping and is never written into a volume.

use crate::value::ValueKind;

pub const AFF4_NAMESPACE: &str = "aff4:";
pub const VOLATILE_NAMESPACE: &str = "aff4volatile:";

// Object graph
pub const TYPE: &str = "aff4:type";
pub const STORED: &str = "aff4:stored";
pub const CONTAINS: &str = "aff4:contains";
pub const AUTOLOAD: &str = "aff4:autoload";
pub const TARGET: &str = "aff4:target";
pub const SIZE: &str = "aff4:size";
pub const TIMESTAMP: &str = "aff4:timestamp";

// Image streams
pub const CHUNK_SIZE: &str = "aff4:chunk_size";
pub const CHUNKS_IN_SEGMENT: &str = "aff4:chunks_in_segment";
pub const COMPRESSION: &str = "aff4:compression";
pub const HASH: &str = "aff4:hash";
pub const HASH_TYPE: &str = "aff4:hash_type";

// Map streams
pub const IMAGE_PERIOD: &str = "aff4:image_period";
pub const TARGET_PERIOD: &str = "aff4:target_period";
pub const BLOCKSIZE: &str = "aff4:blocksize";
pub const MAP_INLINE: &str = "aff4:map_inline";
pub const MAP_ENCODING: &str = "aff4:map_encoding";

// Encrypted streams
pub const CIPHER: &str = "aff4:cipher";
pub const CRYPTO_BLOCKSIZE: &str = "aff4:crypto_blocksize";
pub const PASSWORD_SALT: &str = "aff4:password_salt";
pub const PASSWORD_ITERATIONS: &str = "aff4:password_iterations";
pub const WRAPPED_KEY: &str = "aff4:wrapped_key";
pub const KEY_NONCE: &str = "aff4:key_nonce";
pub const SEALED_KEY: &str = "aff4:sealed_key";

// Identities
pub const STATEMENT: &str = "aff4:statement";
pub const CERTIFICATE: &str = "aff4:certificate";
pub const COMMON_NAME: &str = "aff4:common_name";

// Volatile: ZIP member bookkeeping
pub const ZIP_COMPRESSION: &str = "aff4volatile:compression";
pub const ZIP_COMPRESSED_SIZE: &str = "aff4volatile:compressed_size";
pub const ZIP_CRC: &str = "aff4volatile:crc32";
pub const ZIP_HEADER_OFFSET: &str = "aff4volatile:header_offset";
pub const ZIP_DATA_OFFSET: &str = "aff4volatile:data_offset";
pub const DIRECTORY_OFFSET: &str = "aff4volatile:directory_offset";
pub const WRITE_LOCK: &str = "aff4volatile:write_lock";
pub const DIRTY: &str = "aff4volatile:dirty";

// Object type names
pub const TYPE_ZIP_VOLUME: &str = "aff4:zip_volume";
pub const TYPE_ZIP_MEMBER: &str = "aff4:zip_segment";
pub const TYPE_IMAGE: &str = "aff4:image";
pub const TYPE_MAP: &str = "aff4:map";
pub const TYPE_ENCRYPTED: &str = "aff4:encrypted";
pub const TYPE_LINK: &str = "aff4:link";
pub const TYPE_FILE: &str = "aff4:file";
pub const TYPE_IDENTITY: &str = "aff4:identity";

/// Returns `true` for predicates that must not leave the process.
pub fn is_volatile(predicate: &str) -> bool {
    predicate.starts_with(VOLATILE_NAMESPACE)
}

/// The registered value kind of `predicate`.
pub fn kind_of(predicate: &str) -> ValueKind {
    match predicate {
        STORED | CONTAINS | AUTOLOAD | TARGET | STATEMENT | WRITE_LOCK => ValueKind::Urn,
        SIZE | IMAGE_PERIOD | TARGET_PERIOD | ZIP_COMPRESSED_SIZE | ZIP_HEADER_OFFSET
        | ZIP_DATA_OFFSET | DIRECTORY_OFFSET | TIMESTAMP => ValueKind::Int64,
        CHUNK_SIZE | CHUNKS_IN_SEGMENT | BLOCKSIZE | CRYPTO_BLOCKSIZE | PASSWORD_ITERATIONS
        | ZIP_COMPRESSION | DIRTY => ValueKind::Int32,
        ZIP_CRC => ValueKind::Int64,
        PASSWORD_SALT | WRAPPED_KEY | KEY_NONCE | SEALED_KEY | CERTIFICATE => ValueKind::Binary,
        _ => ValueKind::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatile_namespace() {
        assert!(is_volatile(WRITE_LOCK));
        assert!(is_volatile(ZIP_DATA_OFFSET));
        assert!(!is_volatile(SIZE));
    }

    #[test]
    fn registered_kinds() {
        assert_eq!(kind_of(CONTAINS), ValueKind::Urn);
        assert_eq!(kind_of(SIZE), ValueKind::Int64);
        assert_eq!(kind_of(CHUNK_SIZE), ValueKind::Int32);
        assert_eq!(kind_of(WRAPPED_KEY), ValueKind::Binary);
        assert_eq!(kind_of("custom:note"), ValueKind::String);
    }
}
