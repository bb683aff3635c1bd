//! Hash index configuration
//!
//! Definition (paths, uniqueness, sparsity) plus the sizing knobs of the
//! underlying table.

use serde::{Deserialize, Serialize};

use super::assoc_multi::MIN_BUCKET_CAPACITY;
use super::errors::{IndexError, IndexResult};
use super::extractor::ExtractOptions;
use super::path::{parse_paths, AttributePath};

/// Hash index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Attribute paths, e.g. `["a", "tags[*].name"]`
    pub fields: Vec<String>,

    /// Reject a second document with an existing key (default: false)
    #[serde(default)]
    pub unique: bool,

    /// Skip documents lacking an indexed attribute (default: false)
    #[serde(default)]
    pub sparse: bool,

    /// Index incomplete array expansions with filler values (default: false)
    #[serde(default)]
    pub allow_partial: bool,

    /// Skip repeated array members of one document (default: true)
    #[serde(default = "default_deduplicate")]
    pub deduplicate: bool,

    /// Number of table buckets, a power of two (default: 8)
    #[serde(default = "default_num_buckets")]
    pub num_buckets: usize,

    /// Slots per bucket at creation and after truncate (default: 63)
    #[serde(default = "default_initial_bucket_capacity")]
    pub initial_bucket_capacity: usize,

    /// Workers used by batch inserts (default: 2)
    #[serde(default = "default_bulk_load_threads")]
    pub bulk_load_threads: usize,

    /// Free element storage on removal instead of at truncate (default: false)
    #[serde(default)]
    pub recycle_elements: bool,
}

fn default_deduplicate() -> bool {
    true
}

fn default_num_buckets() -> usize {
    8
}

fn default_initial_bucket_capacity() -> usize {
    63
}

fn default_bulk_load_threads() -> usize {
    2
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            unique: false,
            sparse: false,
            allow_partial: false,
            deduplicate: default_deduplicate(),
            num_buckets: default_num_buckets(),
            initial_bucket_capacity: default_initial_bucket_capacity(),
            bulk_load_threads: default_bulk_load_threads(),
            recycle_elements: false,
        }
    }
}

impl IndexConfig {
    /// Non-unique index on `fields`
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Unique index on `fields`
    pub fn unique<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            unique: true,
            ..Self::new(fields)
        }
    }

    /// Parse a JSON definition.
    pub fn from_json(definition: &str) -> IndexResult<Self> {
        serde_json::from_str(definition)
            .map_err(|e| IndexError::bad_parameter(format!("invalid index definition: {}", e)))
    }

    /// Check the definition and return its parsed paths.
    pub fn validate(&self) -> IndexResult<Vec<AttributePath>> {
        if self.num_buckets == 0 || !self.num_buckets.is_power_of_two() {
            return Err(IndexError::bad_parameter(format!(
                "num_buckets must be a power of two, got {}",
                self.num_buckets
            )));
        }
        if self.initial_bucket_capacity < MIN_BUCKET_CAPACITY {
            return Err(IndexError::bad_parameter(format!(
                "initial_bucket_capacity must be at least {}, got {}",
                MIN_BUCKET_CAPACITY, self.initial_bucket_capacity
            )));
        }
        if self.bulk_load_threads == 0 {
            return Err(IndexError::bad_parameter("bulk_load_threads must be at least 1"));
        }
        parse_paths(&self.fields)
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            sparse: self.sparse,
            allow_partial: self.allow_partial,
            deduplicate: self.deduplicate,
            unique: self.unique,
        }
    }
}
