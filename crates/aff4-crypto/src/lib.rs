//! Cryptographic primitives for AFF4 evidence containers.
//!
//! Provides running SHA-256/BLAKE3 stream digests, AES-256-CBC chunk
//! encryption with position-dependent IVs, password (PBKDF2) and public-key
//! (sealed box) wrapping of stream keys, a key cache, and Ed25519 signing
//! identities.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod cipher;
pub mod error;
pub mod hasher;
pub mod keys;
pub mod signer;

pub use cipher::{BlockCipher, CipherKind};
pub use error::{CryptoError, CryptoResult};
pub use hasher::{HashAlgorithm, StreamHasher};
pub use keys::{DecryptionKey, KeyCache, KeyMaterial, PasswordWrap, RecipientKey, WrappedKey};
pub use signer::{Certificate, Signature, SigningIdentity, SigningKey, VerifyingKey};
