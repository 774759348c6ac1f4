use std::fmt;

use aff4_types::{Urn, Value};
use serde::{Deserialize, Serialize};

/// One attribute fact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Urn,
    pub predicate: String,
    pub value: Value,
}

impl Triple {
    pub fn new(subject: Urn, predicate: impl Into<String>, value: Value) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            value,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}={}", self.subject, self.predicate, self.value)
    }
}
