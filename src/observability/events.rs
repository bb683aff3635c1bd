//! Index lifecycle events
//!
//! Events are explicit and typed; each maps to one stable event name.

use std::fmt;

use super::logger::Severity;

/// Observable index events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Index instance created
    IndexCreated,
    /// All elements dropped
    IndexTruncated,
    /// A table bucket was rebuilt with a new capacity
    BucketResized,
    /// Insert refused by a unique index
    UniqueViolation,
    /// Elements of a failed insert were removed again
    Rollback,
    /// Elements moved to a new document revision in place
    RevisionUpdated,
    /// A document or one of its sub-values could not be resolved
    DocumentNotFound,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::IndexCreated => "INDEX_CREATED",
            Event::IndexTruncated => "INDEX_TRUNCATED",
            Event::BucketResized => "INDEX_BUCKET_RESIZED",
            Event::UniqueViolation => "INDEX_UNIQUE_VIOLATION",
            Event::Rollback => "INDEX_ROLLBACK",
            Event::RevisionUpdated => "INDEX_REVISION_UPDATED",
            Event::DocumentNotFound => "INDEX_DOCUMENT_NOT_FOUND",
        }
    }

    /// Severity the event is logged with
    pub fn severity(&self) -> Severity {
        match self {
            Event::IndexCreated | Event::IndexTruncated | Event::RevisionUpdated => Severity::Info,
            Event::BucketResized => Severity::Trace,
            Event::UniqueViolation | Event::Rollback => Severity::Warn,
            Event::DocumentNotFound => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
