use aff4_crypto::keys::DEFAULT_ITERATIONS;
use aff4_image::ImageConfig;
use serde::{Deserialize, Serialize};

use crate::error::Aff4Result;

/// Environment variable overriding [`ResolverConfig::autoload`].
pub const AUTOLOAD_ENV: &str = "AFF4_AUTOLOAD";

/// What a map read does when one of its targets fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapReadPolicy {
    /// Substitute zeros for the failing range and log a warning.
    #[default]
    BestEffort,
    /// Return the target's error to the caller.
    FailFast,
}

/// Resolver settings.
///
/// ```toml
/// cache_capacity = 64
/// autoload = false
/// map_read_policy = "fail_fast"
///
/// [image]
/// chunk_size = 65536
/// compression = "zstd"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Idle live objects kept before least-recently-used eviction.
    pub cache_capacity: usize,
    /// Decompressed members kept in memory.
    pub member_cache_capacity: usize,
    /// Decompressed chunks kept per image stream.
    pub chunk_cache_capacity: usize,
    /// Load volumes named by `aff4:autoload` when a volume is opened.
    pub autoload: bool,
    pub map_read_policy: MapReadPolicy,
    /// Environment variable consulted for the encryption passphrase.
    pub passphrase_env: String,
    /// Create `<path>.lock` files while a volume is open for writing.
    pub lock_files: bool,
    /// Plaintext block size of new encrypted streams.
    pub encryption_block_size: u32,
    pub password_iterations: u32,
    /// Settings for newly written image streams.
    pub image: ImageConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 64,
            member_cache_capacity: 32,
            chunk_cache_capacity: 64,
            autoload: true,
            map_read_policy: MapReadPolicy::BestEffort,
            passphrase_env: "AFF4_PASSPHRASE".into(),
            lock_files: true,
            encryption_block_size: 4096,
            password_iterations: DEFAULT_ITERATIONS,
            image: ImageConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn from_toml_str(text: &str) -> Aff4Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(AUTOLOAD_ENV) {
            match value.trim() {
                "0" | "false" | "no" => self.autoload = false,
                "1" | "true" | "yes" => self.autoload = true,
                other => tracing::warn!(value = other, "ignoring unrecognised {AUTOLOAD_ENV}"),
            }
        }
        self
    }

    /// The passphrase from the configured environment variable, if set.
    pub fn passphrase_from_env(&self) -> Option<String> {
        std::env::var(&self.passphrase_env)
            .ok()
            .filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aff4_image::ChunkCompression;

    #[test]
    fn defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.cache_capacity, 64);
        assert_eq!(config.image.chunk_size, 32 * 1024);
        assert_eq!(config.image.chunks_per_segment, 2048);
        assert_eq!(config.image.bevy_workers, 3);
        assert!(config.autoload);
        assert_eq!(config.map_read_policy, MapReadPolicy::BestEffort);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ResolverConfig::from_toml_str(
            r#"
            autoload = false
            map_read_policy = "fail_fast"

            [image]
            compression = "zstd"
            chunks_per_segment = 4
            "#,
        )
        .unwrap();
        assert!(!config.autoload);
        assert_eq!(config.map_read_policy, MapReadPolicy::FailFast);
        assert_eq!(config.image.compression, ChunkCompression::Zstd);
        assert_eq!(config.image.chunks_per_segment, 4);
        assert_eq!(config.image.chunk_size, 32 * 1024);
        assert_eq!(config.member_cache_capacity, 32);
    }

    #[test]
    fn bad_toml_is_invalid_argument() {
        assert!(matches!(
            ResolverConfig::from_toml_str("cache_capacity = \"lots\""),
            Err(crate::Aff4Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn autoload_override() {
        let off = ResolverConfig::default().with_overrides(|_| Some("0".into()));
        assert!(!off.autoload);
        let on = off.with_overrides(|_| Some("1".into()));
        assert!(on.autoload);
        let kept = on.with_overrides(|_| Some("maybe".into()));
        assert!(kept.autoload);
    }
}
