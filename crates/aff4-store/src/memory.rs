use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use aff4_types::{Urn, Value};

use crate::error::{StoreError, StoreResult};
use crate::traits::TripleStore;
use crate::triple::Triple;

/// In-memory triple store.
///
/// Subjects map to predicate-sorted value lists behind a single `RwLock`;
/// one coarse lock is enough because the hot path is read-mostly.
pub struct InMemoryTripleStore {
    inner: RwLock<StoreState>,
}

#[derive(Default)]
struct StoreState {
    subjects: HashMap<Urn, BTreeMap<String, Vec<Value>>>,
    sealed: HashSet<(Urn, String)>,
}

impl StoreState {
    fn is_sealed(&self, subject: &Urn, predicate: &str) -> bool {
        self.sealed.contains(&(subject.clone(), predicate.to_string()))
    }

    fn check_writable(&self, subject: &Urn, predicate: &str) -> StoreResult<()> {
        if self.is_sealed(subject, predicate) {
            return Err(StoreError::Sealed {
                subject: subject.clone(),
                predicate: predicate.to_string(),
            });
        }
        Ok(())
    }

    fn values_mut(&mut self, subject: &Urn, predicate: &str) -> &mut Vec<Value> {
        self.subjects
            .entry(subject.clone())
            .or_default()
            .entry(predicate.to_string())
            .or_default()
    }
}

impl InMemoryTripleStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreState::default()),
        }
    }

    /// Number of triples currently stored.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("lock poisoned")
            .subjects
            .values()
            .flat_map(|preds| preds.values())
            .map(Vec::len)
            .sum()
    }

    /// Returns `true` if the store holds no triples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything, including seals.
    pub fn clear(&self) {
        let mut state = self.inner.write().expect("lock poisoned");
        state.subjects.clear();
        state.sealed.clear();
    }
}

impl Default for InMemoryTripleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TripleStore for InMemoryTripleStore {
    fn resolve_all(&self, subject: &Urn, predicate: &str) -> Vec<Value> {
        let state = self.inner.read().expect("lock poisoned");
        state
            .subjects
            .get(subject)
            .and_then(|preds| preds.get(predicate))
            .cloned()
            .unwrap_or_default()
    }

    fn set(&self, subject: &Urn, predicate: &str, value: Value) -> StoreResult<()> {
        let mut state = self.inner.write().expect("lock poisoned");
        state.check_writable(subject, predicate)?;
        let values = state.values_mut(subject, predicate);
        values.clear();
        values.push(value);
        Ok(())
    }

    fn add(&self, subject: &Urn, predicate: &str, value: Value) -> StoreResult<()> {
        let mut state = self.inner.write().expect("lock poisoned");
        state.check_writable(subject, predicate)?;
        state.values_mut(subject, predicate).push(value);
        Ok(())
    }

    fn add_unique(&self, subject: &Urn, predicate: &str, value: Value) -> StoreResult<bool> {
        let mut state = self.inner.write().expect("lock poisoned");
        let exists = state
            .subjects
            .get(subject)
            .and_then(|preds| preds.get(predicate))
            .is_some_and(|values| values.contains(&value));
        if exists {
            return Ok(false);
        }
        state.check_writable(subject, predicate)?;
        state.values_mut(subject, predicate).push(value);
        Ok(true)
    }

    fn delete(&self, subject: &Urn, predicate: &str) -> bool {
        let mut state = self.inner.write().expect("lock poisoned");
        if state.is_sealed(subject, predicate) {
            return false;
        }
        let Some(preds) = state.subjects.get_mut(subject) else {
            return false;
        };
        let removed = preds.remove(predicate).is_some_and(|v| !v.is_empty());
        if preds.is_empty() {
            state.subjects.remove(subject);
        }
        removed
    }

    fn delete_subject(&self, subject: &Urn) -> usize {
        let mut state = self.inner.write().expect("lock poisoned");
        let sealed: HashSet<String> = state
            .sealed
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, p)| p.clone())
            .collect();
        let Some(preds) = state.subjects.get_mut(subject) else {
            return 0;
        };
        let mut removed = 0;
        preds.retain(|predicate, values| {
            if sealed.contains(predicate) {
                true
            } else {
                removed += values.len();
                false
            }
        });
        if preds.is_empty() {
            state.subjects.remove(subject);
        }
        removed
    }

    fn seal(&self, subject: &Urn, predicate: &str) {
        let mut state = self.inner.write().expect("lock poisoned");
        state
            .sealed
            .insert((subject.clone(), predicate.to_string()));
    }

    fn is_sealed(&self, subject: &Urn, predicate: &str) -> bool {
        self.inner
            .read()
            .expect("lock poisoned")
            .is_sealed(subject, predicate)
    }

    fn subjects(&self) -> Vec<Urn> {
        let state = self.inner.read().expect("lock poisoned");
        let mut subjects: Vec<Urn> = state.subjects.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    fn triples(&self, subject: &Urn) -> Vec<Triple> {
        let state = self.inner.read().expect("lock poisoned");
        let Some(preds) = state.subjects.get(subject) else {
            return Vec::new();
        };
        preds
            .iter()
            .flat_map(|(predicate, values)| {
                values
                    .iter()
                    .map(move |v| Triple::new(subject.clone(), predicate.clone(), v.clone()))
            })
            .collect()
    }
}

impl std::fmt::Debug for InMemoryTripleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTripleStore")
            .field("triple_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aff4_types::predicates;
    use proptest::prelude::*;

    fn urn(s: &str) -> Urn {
        Urn::from(s)
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let store = InMemoryTripleStore::new();
        let err = store.resolve(&urn("aff4://x"), predicates::SIZE).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn set_replaces_all_values() {
        let store = InMemoryTripleStore::new();
        let s = urn("aff4://x");
        store.add(&s, predicates::SIZE, Value::Int64(1)).unwrap();
        store.add(&s, predicates::SIZE, Value::Int64(2)).unwrap();
        store.set(&s, predicates::SIZE, Value::Int64(3)).unwrap();
        assert_eq!(store.resolve_all(&s, predicates::SIZE), vec![Value::Int64(3)]);
    }

    #[test]
    fn add_preserves_order() {
        let store = InMemoryTripleStore::new();
        let vol = urn("aff4://vol");
        for name in ["c", "a", "b"] {
            store
                .add(&vol, predicates::CONTAINS, Value::Urn(vol.join(name)))
                .unwrap();
        }
        let contained = store.resolve_urns(&vol, predicates::CONTAINS);
        let names: Vec<_> = contained.iter().map(|u| u.relative_to(&vol).unwrap()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn add_unique_skips_duplicates() {
        let store = InMemoryTripleStore::new();
        let s = urn("aff4://vol");
        let member = Value::Urn(urn("aff4://vol/m"));
        assert!(store.add_unique(&s, predicates::CONTAINS, member.clone()).unwrap());
        assert!(!store.add_unique(&s, predicates::CONTAINS, member).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sealed_pairs_are_write_once() {
        let store = InMemoryTripleStore::new();
        let s = urn("aff4://img");
        store.set(&s, predicates::HASH, Value::from("abc")).unwrap();
        store.seal(&s, predicates::HASH);

        assert!(!store.delete(&s, predicates::HASH));
        assert_eq!(store.delete_subject(&s), 0);
        let err = store.set(&s, predicates::HASH, Value::from("def")).unwrap_err();
        assert!(matches!(err, StoreError::Sealed { .. }));
        assert_eq!(store.resolve_string(&s, predicates::HASH).unwrap(), "abc");
    }

    #[test]
    fn delete_removes_empty_subjects() {
        let store = InMemoryTripleStore::new();
        let s = urn("aff4://x");
        store.set(&s, predicates::SIZE, Value::Int64(1)).unwrap();
        assert!(store.delete(&s, predicates::SIZE));
        assert!(store.subjects().is_empty());
        assert!(!store.delete(&s, predicates::SIZE));
    }

    #[test]
    fn wrong_kind_is_reported() {
        let store = InMemoryTripleStore::new();
        let s = urn("aff4://x");
        store.set(&s, predicates::SIZE, Value::Binary(vec![1])).unwrap();
        let err = store.resolve_u64(&s, predicates::SIZE).unwrap_err();
        assert!(matches!(err, StoreError::WrongKind { .. }));
    }

    #[test]
    fn query_filters_by_prefixes() {
        let store = InMemoryTripleStore::new();
        let a = urn("aff4://vol/a");
        let b = urn("aff4://other/b");
        store.set(&a, predicates::TYPE, Value::from(predicates::TYPE_IMAGE)).unwrap();
        store.set(&a, predicates::SIZE, Value::Int64(10)).unwrap();
        store.set(&b, predicates::TYPE, Value::from(predicates::TYPE_MAP)).unwrap();

        assert_eq!(store.query(Some("aff4://vol"), None, None).len(), 2);
        assert_eq!(store.query(None, Some("aff4:type"), None).len(), 2);
        let maps = store.query(None, Some(predicates::TYPE), Some("aff4:map"));
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].subject, b);
    }

    #[test]
    fn export_parse_roundtrip() {
        let source = InMemoryTripleStore::new();
        let s = urn("aff4://vol/image");
        source.set(&s, predicates::TYPE, Value::from(predicates::TYPE_IMAGE)).unwrap();
        source.set(&s, predicates::SIZE, Value::Int64(1 << 40)).unwrap();
        source.set(&s, predicates::CHUNK_SIZE, Value::Int32(32768)).unwrap();
        source.set(&s, predicates::WRAPPED_KEY, Value::Binary(vec![9, 8, 7])).unwrap();
        source.add(&s, "custom:tag", Value::from("second line\nhere")).unwrap();
        source.add(&s, "custom:tag", Value::from("another")).unwrap();
        source.set(&s, predicates::WRITE_LOCK, Value::Urn(urn("aff4://w"))).unwrap();

        let text = source.export(&s);
        let target = InMemoryTripleStore::new();
        target.parse(&urn("aff4://vol"), &text).unwrap();

        let expected: Vec<Triple> = source
            .triples(&s)
            .into_iter()
            .filter(|t| !predicates::is_volatile(&t.predicate))
            .collect();
        assert_eq!(target.triples(&s), expected);
    }

    #[test]
    fn parse_skips_sealed_pairs() {
        let store = InMemoryTripleStore::new();
        let s = urn("aff4://vol/img");
        store.set(&s, predicates::HASH, Value::from("good")).unwrap();
        store.seal(&s, predicates::HASH);
        let added = store
            .parse(&urn("aff4://vol"), "aff4://vol/img aff4:hash=evil\n")
            .unwrap();
        assert_eq!(added, 0);
        assert_eq!(store.resolve_all(&s, predicates::HASH), vec![Value::from("good")]);
    }

    proptest! {
        #[test]
        fn multi_valued_roundtrip(values in proptest::collection::vec("[a-z0-9 =]{0,12}", 1..8)) {
            let source = InMemoryTripleStore::new();
            let s = urn("aff4://vol/p");
            let mut unique = Vec::new();
            for v in &values {
                if !unique.contains(v) {
                    unique.push(v.clone());
                }
                source.add_unique(&s, "custom:list", Value::from(v.as_str())).unwrap();
            }
            let target = InMemoryTripleStore::new();
            target.parse(&urn("aff4://vol"), &source.export(&s)).unwrap();
            let got: Vec<Value> = target.resolve_all(&s, "custom:list");
            let want: Vec<Value> = unique.iter().map(|v| Value::from(v.as_str())).collect();
            prop_assert_eq!(got, want);
        }
    }
}
