//! Hash index subsystem
//!
//! Secondary indexes over packed documents, held in memory only and
//! rebuilt from the document store when needed.
//!
//! # Layers
//!
//! - `path` / `extractor`: project a document onto index tuples
//! - `element`: compact per-tuple entries stored in the element arena
//! - `assoc_multi`: sharded open-addressing table of element handles
//! - `hash_index`: the index facade tying the layers together
//!
//! # Invariants
//!
//! - Elements with equal keys form one chain per key
//! - A unique index never holds two elements with equal keys
//! - A failed insert leaves no element of the document behind

pub mod assoc_multi;
pub mod config;
pub mod element;
mod errors;
pub mod extractor;
pub mod hash_index;
pub mod iterator;
pub mod key;
pub mod path;

pub use assoc_multi::{
    AssocHelper, AssocMulti, BucketStats, InvariantViolation, KeyPolicy, Multi, Unique,
};
pub use config::IndexConfig;
pub use element::{IndexElement, SubValue};
pub use errors::{IndexError, IndexErrorCode, IndexResult, Severity};
pub use extractor::{extract_tuples, ExtractOptions, IndexTuple, IndexValue};
pub use hash_index::{ElementHelper, HashIndex, IndexDescription, IndexMode};
pub use iterator::{HashIndexIterator, LookupCursor, LookupPage};
pub use key::IndexKey;
pub use path::{parse_paths, AttributePath};
