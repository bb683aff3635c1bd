//! Document representation consumed by the index engine
//!
//! Documents are kept in a packed binary form so that index entries can
//! point into them by byte offset. This module provides the codec, validated
//! read-only views with normalized comparison/hashing, and the resolver
//! contract through which the index reaches document bytes.
//!
//! # Invariants
//!
//! - Every `ValueSlice` handed out points at a fully validated value
//! - Values that compare equal hash equal
//! - Object keys are stored sorted, so equal objects encode identically

pub mod codec;
mod errors;
mod slice;
mod store;

pub use errors::{DocumentError, DocumentResult};
pub use slice::{ArrayIter, ObjectIter, ValueSlice, ValueType};
pub use store::{DocumentId, DocumentResolver, MemoryDocumentStore, PackedDocument};
