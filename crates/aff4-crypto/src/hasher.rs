use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::CryptoError;

/// Digest algorithm of an image stream's content hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    /// The name recorded in `aff4:hash_type`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Start a running digest.
    pub fn hasher(self) -> StreamHasher {
        StreamHasher::new(self)
    }

    /// One-shot digest of `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(CryptoError::UnknownHash(other.to_string())),
        }
    }
}

enum HasherState {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

/// Running digest over every uncompressed byte written to a stream.
pub struct StreamHasher {
    algorithm: HashAlgorithm,
    state: HasherState,
    bytes: u64,
}

impl StreamHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Blake3 => HasherState::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self {
            algorithm,
            state,
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(data),
            HasherState::Blake3(h) => {
                h.update(data);
            }
        }
        self.bytes += data.len() as u64;
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Number of bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> Vec<u8> {
        match self.state {
            HasherState::Sha256(h) => h.finalize().to_vec(),
            HasherState::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }

    /// Lowercase hex digest, the form stored in `aff4:hash`.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.finalize())
    }
}

impl fmt::Debug for StreamHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHasher")
            .field("algorithm", &self.algorithm)
            .field("bytes", &self.bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            hex::encode(HashAlgorithm::Sha256.digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn streaming_matches_one_shot() {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Blake3] {
            let mut hasher = algorithm.hasher();
            hasher.update(b"hello ");
            hasher.update(b"world");
            assert_eq!(hasher.bytes_hashed(), 11);
            assert_eq!(hasher.finalize(), algorithm.digest(b"hello world"));
        }
    }

    #[test]
    fn blake3_matches_library() {
        assert_eq!(
            HashAlgorithm::Blake3.digest(b"data"),
            blake3::hash(b"data").as_bytes().to_vec()
        );
    }

    #[test]
    fn names_roundtrip() {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Blake3] {
            assert_eq!(algorithm.name().parse::<HashAlgorithm>().unwrap(), algorithm);
        }
        assert!(matches!(
            "md5".parse::<HashAlgorithm>(),
            Err(CryptoError::UnknownHash(_))
        ));
    }
}
