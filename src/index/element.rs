//! Index elements
//!
//! An `IndexElement` is what the hash table stores for one indexed tuple: the
//! identity of the owning document plus one `SubValue` per index path. Small
//! values (at most 12 encoded bytes) are copied inline; larger ones are kept
//! as a byte offset into the owning document and resolved on demand.

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::document::{DocumentId, DocumentResolver, ValueSlice};

use super::errors::{IndexError, IndexResult};
use super::extractor::IndexValue;

/// Largest encoded value stored inline
pub const INLINE_CAPACITY: usize = 12;

/// Seed of the key hash fold
pub(crate) const KEY_HASH_SEED: u64 = 0x8765_4321;

/// One slot of an index element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubValue {
    /// Encoded bytes of a small value
    Inline { len: u8, bytes: [u8; INLINE_CAPACITY] },
    /// Byte offset into the owning document
    Offset(u32),
}

impl SubValue {
    /// Inline an encoded value; None if it does not fit.
    pub fn inline(encoded: &[u8]) -> Option<Self> {
        if encoded.len() > INLINE_CAPACITY || encoded.is_empty() {
            return None;
        }
        let mut bytes = [0u8; INLINE_CAPACITY];
        bytes[..encoded.len()].copy_from_slice(encoded);
        Some(SubValue::Inline {
            len: encoded.len() as u8,
            bytes,
        })
    }

    /// Store an extracted value, inline when small enough.
    pub fn from_index_value(value: &IndexValue<'_>) -> IndexResult<Self> {
        let encoded = value.as_bytes();
        if let Some(inline) = Self::inline(encoded) {
            return Ok(inline);
        }
        match value {
            IndexValue::Slice(slice) => u32::try_from(slice.offset())
                .map(SubValue::Offset)
                .map_err(|_| {
                    IndexError::bad_parameter(format!(
                        "sub-value offset {} exceeds the addressable range",
                        slice.offset()
                    ))
                }),
            // Sentinels are a single byte and always fit inline.
            IndexValue::Null | IndexValue::Illegal => {
                Err(IndexError::bad_parameter("sentinel value does not fit inline"))
            }
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, SubValue::Inline { .. })
    }
}

/// Fixed-arity index entry for one document tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexElement {
    identity: DocumentId,
    sub_values: Box<[SubValue]>,
}

impl IndexElement {
    pub fn new(identity: DocumentId, sub_values: Vec<SubValue>) -> Self {
        Self {
            identity,
            sub_values: sub_values.into_boxed_slice(),
        }
    }

    /// Build an element from one extracted tuple.
    pub fn from_tuple(identity: DocumentId, tuple: &[IndexValue<'_>]) -> IndexResult<Self> {
        let sub_values = tuple
            .iter()
            .map(SubValue::from_index_value)
            .collect::<IndexResult<Vec<_>>>()?;
        Ok(Self::new(identity, sub_values))
    }

    /// Owning document
    pub fn identity(&self) -> DocumentId {
        self.identity
    }

    /// Rewrite the owning document in place.
    ///
    /// Only valid when the key portion stays byte-for-byte resolvable under
    /// the new identity.
    pub(crate) fn set_identity(&mut self, identity: DocumentId) {
        self.identity = identity;
    }

    pub(crate) fn set_sub_values(&mut self, sub_values: Vec<SubValue>) {
        self.sub_values = sub_values.into_boxed_slice();
    }

    pub fn sub_values(&self) -> &[SubValue] {
        &self.sub_values
    }

    /// Number of index paths
    pub fn arity(&self) -> usize {
        self.sub_values.len()
    }

    /// Resolve sub-value `index` to the value it stands for.
    pub fn slice<'a, R>(&'a self, index: usize, resolver: &'a R) -> IndexResult<ValueSlice<'a>>
    where
        R: DocumentResolver + ?Sized,
    {
        let sub_value = self.sub_values.get(index).ok_or_else(|| {
            IndexError::bad_parameter(format!(
                "sub-value {} out of range for arity {}",
                index,
                self.arity()
            ))
        })?;
        match sub_value {
            SubValue::Inline { len, bytes } => {
                // Inline bytes are copies of validated encodings.
                let len = *len as usize;
                Ok(ValueSlice::from_validated(&bytes[..len], 0, len))
            }
            SubValue::Offset(offset) => {
                let document = resolver.resolve(self.identity).ok_or_else(|| {
                    IndexError::document_not_found(self.identity, "resolver has no such document")
                })?;
                document
                    .slice_at(*offset as usize)
                    .map_err(|e| IndexError::from_document(self.identity, e))
            }
        }
    }

    /// Hash of the key portion, equal for every element with an equal key.
    pub fn hash_key<R>(&self, resolver: &R) -> IndexResult<u64>
    where
        R: DocumentResolver + ?Sized,
    {
        let mut hash = KEY_HASH_SEED;
        for i in 0..self.arity() {
            hash = self.slice(i, resolver)?.normalized_hash(hash);
        }
        Ok(hash)
    }

    /// Hash of the owning document identity
    pub fn hash_identity(&self) -> u64 {
        hash_document_id(self.identity)
    }

    /// Whether both elements carry normalized-equal keys.
    pub fn key_equals<R>(&self, other: &IndexElement, resolver: &R) -> IndexResult<bool>
    where
        R: DocumentResolver + ?Sized,
    {
        if self.arity() != other.arity() {
            return Ok(false);
        }
        for i in 0..self.arity() {
            if !self.slice(i, resolver)?.equals(&other.slice(i, resolver)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Resolved key values as JSON, for diagnostics
    pub fn key_to_json<R>(&self, resolver: &R) -> IndexResult<Vec<serde_json::Value>>
    where
        R: DocumentResolver + ?Sized,
    {
        (0..self.arity())
            .map(|i| self.slice(i, resolver).map(|s| s.to_json()))
            .collect()
    }

    /// Approximate heap and inline footprint in bytes
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.sub_values.len() * std::mem::size_of::<SubValue>()
    }
}

/// Fold a key hash over already-encoded slices.
pub(crate) fn hash_slices<'a>(slices: impl IntoIterator<Item = ValueSlice<'a>>) -> u64 {
    slices
        .into_iter()
        .fold(KEY_HASH_SEED, |hash, slice| slice.normalized_hash(hash))
}

/// Identity hash for a bare document id
pub(crate) fn hash_document_id(id: DocumentId) -> u64 {
    xxh3_64_with_seed(&id.as_u64().to_le_bytes(), 0)
}
