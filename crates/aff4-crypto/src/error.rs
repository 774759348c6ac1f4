/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The derived key failed the nonce check.
    #[error("bad passphrase: key nonce does not match")]
    BadPassphrase,

    /// None of the available decryption keys opens a sealed key.
    #[error("no decryption key matches any sealed key")]
    NoMatchingKey,

    /// A certificate file could not be parsed or does not match its key.
    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("invalid signature")]
    InvalidSignature,

    /// Key bytes have the wrong length or encoding.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Cipher input is not a whole number of cipher blocks.
    #[error("buffer of {len} bytes is not a multiple of {block} bytes")]
    BlockAlignment { len: usize, block: usize },

    #[error("unknown hash algorithm: {0}")]
    UnknownHash(String),

    #[error("unknown cipher: {0}")]
    UnknownCipher(String),
}

/// Result alias for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
