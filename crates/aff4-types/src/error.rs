use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid {encoding} string: {reason}")]
    InvalidEncoding {
        encoding: &'static str,
        reason: String,
    },

    #[error("invalid integer {0:?}")]
    InvalidInteger(String),

    #[error("invalid size {0:?}")]
    InvalidSize(String),

    #[error("invalid URN {0:?}")]
    InvalidUrn(String),

    #[error("cannot convert {value} to {expected}")]
    KindMismatch {
        value: String,
        expected: &'static str,
    },
}
