//! Index error types
//!
//! Error codes:
//! - AERO_INDEX_OUT_OF_MEMORY (FATAL)
//! - AERO_INDEX_UNIQUE_VIOLATION (ERROR)
//! - AERO_INDEX_DOCUMENT_NOT_FOUND (FATAL)
//! - AERO_INDEX_BAD_PARAMETER (ERROR)
//!
//! FATAL errors abort the calling operation, never the process.

use std::fmt;

use crate::document::{DocumentError, DocumentId};

/// Severity levels for index errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation rejected, caller decides how to proceed
    Error,
    /// Operation must be aborted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Index-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorCode {
    /// Arena block allocation failed
    AeroIndexOutOfMemory,
    /// Duplicate key on a unique index
    AeroIndexUniqueViolation,
    /// Document bytes could not be resolved
    AeroIndexDocumentNotFound,
    /// Invalid argument or index definition
    AeroIndexBadParameter,
}

impl IndexErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            IndexErrorCode::AeroIndexOutOfMemory => "AERO_INDEX_OUT_OF_MEMORY",
            IndexErrorCode::AeroIndexUniqueViolation => "AERO_INDEX_UNIQUE_VIOLATION",
            IndexErrorCode::AeroIndexDocumentNotFound => "AERO_INDEX_DOCUMENT_NOT_FOUND",
            IndexErrorCode::AeroIndexBadParameter => "AERO_INDEX_BAD_PARAMETER",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            IndexErrorCode::AeroIndexOutOfMemory | IndexErrorCode::AeroIndexDocumentNotFound => {
                Severity::Fatal
            }
            IndexErrorCode::AeroIndexUniqueViolation | IndexErrorCode::AeroIndexBadParameter => {
                Severity::Error
            }
        }
    }
}

impl fmt::Display for IndexErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Index error type with full context
#[derive(Debug, Clone)]
pub struct IndexError {
    /// Error code
    code: IndexErrorCode,
    /// Human-readable message
    message: String,
    /// Existing document that caused a unique constraint violation
    conflicting: Option<DocumentId>,
}

impl IndexError {
    /// Create an out-of-memory error
    pub fn out_of_memory(reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::AeroIndexOutOfMemory,
            message: reason.into(),
            conflicting: None,
        }
    }

    /// Create a unique constraint violation naming the existing document
    pub fn unique_violation(conflicting: DocumentId) -> Self {
        Self {
            code: IndexErrorCode::AeroIndexUniqueViolation,
            message: format!("unique constraint violated, conflicting document {}", conflicting),
            conflicting: Some(conflicting),
        }
    }

    /// Create a document-not-found error
    pub fn document_not_found(id: DocumentId, reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::AeroIndexDocumentNotFound,
            message: format!("document {}: {}", id, reason.into()),
            conflicting: None,
        }
    }

    /// Create a bad-parameter error
    pub fn bad_parameter(reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::AeroIndexBadParameter,
            message: reason.into(),
            conflicting: None,
        }
    }

    /// Map a codec failure for the given document
    pub fn from_document(id: DocumentId, err: DocumentError) -> Self {
        Self::document_not_found(id, err.to_string())
    }

    /// Returns the error code
    pub fn code(&self) -> IndexErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the conflicting document of a unique violation
    pub fn conflicting(&self) -> Option<DocumentId> {
        self.conflicting
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether this is a unique constraint violation
    pub fn is_unique_violation(&self) -> bool {
        self.code == IndexErrorCode::AeroIndexUniqueViolation
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for IndexError {}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;
