//! aerodb-hashindex - In-memory hash indexes over packed documents
//!
//! Document-store secondary indexes built from an element arena, a key
//! extractor and a sharded multi-value hash table.

pub mod arena;
pub mod document;
pub mod index;
pub mod observability;
