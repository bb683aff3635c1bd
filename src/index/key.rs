//! Lookup keys
//!
//! An `IndexKey` is the tuple a caller looks up: one value per index path,
//! given as JSON and encoded once up front so that hashing and comparison
//! work on the same representation as stored sub-values.

use serde_json::Value;

use crate::document::{codec, DocumentResolver, ValueSlice};

use super::element::{hash_slices, IndexElement};
use super::errors::{IndexError, IndexResult};

/// Encoded lookup tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    values: Vec<Vec<u8>>,
}

impl IndexKey {
    /// Encode a tuple of JSON values.
    pub fn from_json(values: &[Value]) -> IndexResult<Self> {
        let values = values
            .iter()
            .map(|v| {
                codec::encode(v)
                    .map_err(|e| IndexError::bad_parameter(format!("lookup value: {}", e)))
            })
            .collect::<IndexResult<Vec<_>>>()?;
        Ok(Self { values })
    }

    /// Number of values
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn slices(&self) -> impl Iterator<Item = ValueSlice<'_>> + '_ {
        self.values
            .iter()
            .map(|bytes| ValueSlice::from_validated(bytes, 0, bytes.len()))
    }

    /// Key hash; equal to the key hash of every matching element
    pub fn hash(&self) -> u64 {
        hash_slices(self.slices())
    }

    /// Whether `element` carries this key
    pub fn matches<R>(&self, element: &IndexElement, resolver: &R) -> IndexResult<bool>
    where
        R: DocumentResolver + ?Sized,
    {
        if element.arity() != self.arity() {
            return Ok(false);
        }
        for (i, slice) in self.slices().enumerate() {
            if !element.slice(i, resolver)?.equals(&slice) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Normalized equality, e.g. `[5]` equals `[5.0]`
    pub fn equals(&self, other: &IndexKey) -> bool {
        self.arity() == other.arity()
            && self
                .slices()
                .zip(other.slices())
                .all(|(a, b)| a.equals(&b))
    }

    pub fn to_json(&self) -> Vec<Value> {
        self.slices().map(|s| s.to_json()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentId, MemoryDocumentStore};
    use crate::index::element::SubValue;
    use serde_json::json;

    #[test]
    fn test_key_hash_matches_element_hash() {
        let mut store = MemoryDocumentStore::new();
        let id = DocumentId(1);
        store
            .insert(id, &json!({"name": "a rather long string value", "n": 3}))
            .unwrap();
        let root = store.get(id).unwrap().root();
        let name = root.get("name").unwrap();
        let element = IndexElement::new(
            id,
            vec![
                SubValue::Offset(name.offset() as u32),
                SubValue::inline(root.get("n").unwrap().as_bytes()).unwrap(),
            ],
        );

        let key = IndexKey::from_json(&[json!("a rather long string value"), json!(3.0)]).unwrap();
        assert_eq!(key.hash(), element.hash_key(&store).unwrap());
        assert!(key.matches(&element, &store).unwrap());

        let other = IndexKey::from_json(&[json!("a rather long string value"), json!(4)]).unwrap();
        assert!(!other.matches(&element, &store).unwrap());
    }

    #[test]
    fn test_arity_mismatch_never_matches() {
        let store = MemoryDocumentStore::new();
        let element = IndexElement::new(
            DocumentId(1),
            vec![SubValue::inline(&codec::encode(&json!(1)).unwrap()).unwrap()],
        );
        let key = IndexKey::from_json(&[json!(1), json!(2)]).unwrap();
        assert!(!key.matches(&element, &store).unwrap());
    }

    #[test]
    fn test_null_key_round_trips() {
        let key = IndexKey::from_json(&[Value::Null]).unwrap();
        assert_eq!(key.to_json(), vec![Value::Null]);
        assert_eq!(key.arity(), 1);
    }
}
