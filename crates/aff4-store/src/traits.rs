use aff4_types::{Urn, Value};

use crate::error::{StoreError, StoreResult};
use crate::text;
use crate::triple::Triple;

/// Multi-valued attribute store.
///
/// All implementations must satisfy these invariants:
/// - Values of a (subject, predicate) pair keep insertion order.
/// - `set` is atomic with respect to other callers: readers observe either
///   the old values or exactly the new one.
/// - Sealed pairs never change again.
pub trait TripleStore: Send + Sync {
    /// All values of the pair, in insertion order. Empty when absent.
    fn resolve_all(&self, subject: &Urn, predicate: &str) -> Vec<Value>;

    /// Replace every value of the pair with `value`.
    fn set(&self, subject: &Urn, predicate: &str, value: Value) -> StoreResult<()>;

    /// Append `value` to the pair.
    fn add(&self, subject: &Urn, predicate: &str, value: Value) -> StoreResult<()>;

    /// Append `value` unless an equal value is already present.
    ///
    /// Returns `true` if the value was added.
    fn add_unique(&self, subject: &Urn, predicate: &str, value: Value) -> StoreResult<bool>;

    /// Remove all values of the pair. Returns `true` if anything was removed.
    ///
    /// Sealed pairs are left untouched.
    fn delete(&self, subject: &Urn, predicate: &str) -> bool;

    /// Remove every unsealed value of a subject. Returns the number removed.
    fn delete_subject(&self, subject: &Urn) -> usize;

    /// Make the pair write-once.
    fn seal(&self, subject: &Urn, predicate: &str);

    fn is_sealed(&self, subject: &Urn, predicate: &str) -> bool;

    /// Every subject with at least one value, sorted.
    fn subjects(&self) -> Vec<Urn>;

    /// All triples of a subject, predicates sorted, values in insertion order.
    fn triples(&self, subject: &Urn) -> Vec<Triple>;

    /// The first value of the pair.
    fn resolve(&self, subject: &Urn, predicate: &str) -> StoreResult<Value> {
        self.resolve_all(subject, predicate)
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                subject: subject.clone(),
                predicate: predicate.to_string(),
            })
    }

    fn resolve_urn(&self, subject: &Urn, predicate: &str) -> StoreResult<Urn> {
        match self.resolve(subject, predicate)? {
            Value::Urn(urn) => Ok(urn),
            Value::String(s) => Ok(Urn::new(s)),
            _ => Err(StoreError::WrongKind {
                subject: subject.clone(),
                predicate: predicate.to_string(),
                expected: "a URN",
            }),
        }
    }

    fn resolve_u64(&self, subject: &Urn, predicate: &str) -> StoreResult<u64> {
        self.resolve(subject, predicate)?
            .as_u64()
            .ok_or_else(|| StoreError::WrongKind {
                subject: subject.clone(),
                predicate: predicate.to_string(),
                expected: "an unsigned integer",
            })
    }

    fn resolve_string(&self, subject: &Urn, predicate: &str) -> StoreResult<String> {
        match self.resolve(subject, predicate)? {
            Value::String(s) => Ok(s),
            Value::Urn(u) => Ok(u.to_string()),
            other => Ok(other.to_string()),
        }
    }

    fn resolve_bytes(&self, subject: &Urn, predicate: &str) -> StoreResult<Vec<u8>> {
        match self.resolve(subject, predicate)? {
            Value::Binary(b) => Ok(b),
            _ => Err(StoreError::WrongKind {
                subject: subject.clone(),
                predicate: predicate.to_string(),
                expected: "binary",
            }),
        }
    }

    /// All URN values of a multi-valued pair, skipping other kinds.
    fn resolve_urns(&self, subject: &Urn, predicate: &str) -> Vec<Urn> {
        self.resolve_all(subject, predicate)
            .into_iter()
            .filter_map(|v| match v {
                Value::Urn(u) => Some(u),
                Value::String(s) => Some(Urn::new(s)),
                _ => None,
            })
            .collect()
    }

    /// Triples whose subject, predicate and encoded value start with the
    /// given prefixes. `None` matches everything.
    fn query(
        &self,
        subject_prefix: Option<&str>,
        predicate_prefix: Option<&str>,
        value_prefix: Option<&str>,
    ) -> Vec<Triple> {
        self.subjects()
            .into_iter()
            .filter(|s| subject_prefix.map_or(true, |p| s.as_str().starts_with(p)))
            .flat_map(|s| self.triples(&s))
            .filter(|t| predicate_prefix.map_or(true, |p| t.predicate.starts_with(p)))
            .filter(|t| value_prefix.map_or(true, |p| t.value.to_string().starts_with(p)))
            .collect()
    }

    /// Serialize the subject's non-volatile triples as properties text.
    fn export(&self, subject: &Urn) -> String {
        text::export_triples(&self.triples(subject))
    }

    /// Load properties text, resolving relative URNs against `context`.
    ///
    /// Returns the number of triples added. Lines touching sealed pairs are
    /// skipped.
    fn parse(&self, context: &Urn, input: &str) -> StoreResult<usize> {
        let mut added = 0;
        for triple in text::parse_triples(context, input)? {
            match self.add_unique(&triple.subject, &triple.predicate, triple.value) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(StoreError::Sealed { subject, predicate }) => {
                    tracing::debug!(%subject, predicate, "skipping sealed attribute");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }
}
