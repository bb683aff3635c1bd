//! Document identities, packed documents and the resolver contract
//!
//! The index never owns document content. Sub-values that do not fit inline
//! are stored as byte offsets and resolved through a `DocumentResolver` on
//! demand; the resolver must outlive every index entry that refers to it.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec;
use super::errors::{DocumentError, DocumentResult};
use super::slice::ValueSlice;

/// Opaque 64-bit document/revision identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl DocumentId {
    pub fn new(id: u64) -> Self {
        DocumentId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DocumentId {
    fn from(id: u64) -> Self {
        DocumentId(id)
    }
}

/// A document in its serialized form.
///
/// The buffer is validated on construction; the root is always an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedDocument {
    bytes: Vec<u8>,
}

impl PackedDocument {
    /// Serialize a JSON object.
    pub fn from_json(value: &Value) -> DocumentResult<Self> {
        if !value.is_object() {
            return Err(DocumentError::NotAnObject);
        }
        Ok(Self {
            bytes: codec::encode(value)?,
        })
    }

    /// Adopt an existing buffer after validating it.
    pub fn from_bytes(bytes: Vec<u8>) -> DocumentResult<Self> {
        let size = codec::validate(&bytes, 0)?;
        if size != bytes.len() {
            return Err(DocumentError::InvalidSize {
                size: bytes.len(),
                offset: 0,
            });
        }
        if bytes[0] != codec::tags::OBJECT {
            return Err(DocumentError::NotAnObject);
        }
        Ok(Self { bytes })
    }

    /// Root object of the document
    pub fn root(&self) -> ValueSlice<'_> {
        // The whole buffer was validated on construction.
        ValueSlice::from_validated(&self.bytes, 0, self.bytes.len())
    }

    /// Value stored at `offset`, validated before it is handed out.
    pub fn slice_at(&self, offset: usize) -> DocumentResult<ValueSlice<'_>> {
        if offset >= self.bytes.len() {
            return Err(DocumentError::Truncated(offset));
        }
        ValueSlice::validated(&self.bytes, offset)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_json(&self) -> Value {
        self.root().to_json()
    }
}

/// Maps a document identity back to its serialized form
pub trait DocumentResolver {
    /// Returns None if the document is unknown
    fn resolve(&self, id: DocumentId) -> Option<&PackedDocument>;
}

/// In-memory document store used as a resolver
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: HashMap<DocumentId, PackedDocument>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and store a document, replacing any previous version.
    pub fn insert(&mut self, id: DocumentId, body: &Value) -> DocumentResult<()> {
        let packed = PackedDocument::from_json(body)?;
        self.documents.insert(id, packed);
        Ok(())
    }

    pub fn insert_packed(&mut self, id: DocumentId, document: PackedDocument) {
        self.documents.insert(id, document);
    }

    pub fn remove(&mut self, id: DocumentId) -> Option<PackedDocument> {
        self.documents.remove(&id)
    }

    pub fn get(&self, id: DocumentId) -> Option<&PackedDocument> {
        self.documents.get(&id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentResolver for MemoryDocumentStore {
    fn resolve(&self, id: DocumentId) -> Option<&PackedDocument> {
        self.documents.get(&id)
    }
}
