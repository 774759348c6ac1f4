use aff4_types::{TypeError, Urn};

/// Errors from attribute store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No value is recorded for the pair.
    #[error("no {predicate} recorded for {subject}")]
    NotFound { subject: Urn, predicate: String },

    /// The value exists but has the wrong kind for the request.
    #[error("{predicate} of {subject} is not {expected}")]
    WrongKind {
        subject: Urn,
        predicate: String,
        expected: &'static str,
    },

    /// The pair was sealed by an identity and can no longer change.
    #[error("{predicate} of {subject} is sealed")]
    Sealed { subject: Urn, predicate: String },

    /// A properties line could not be parsed.
    #[error("malformed properties line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Returns `true` for the recoverable absence case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
