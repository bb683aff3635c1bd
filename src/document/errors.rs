//! # Document Errors

use thiserror::Error;

/// Result type for document codec operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors raised while encoding or navigating packed documents
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("Truncated value at offset {0}")]
    Truncated(usize),

    #[error("Unknown type tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("Invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    #[error("Invalid size {size} for value at offset {offset}")]
    InvalidSize { size: usize, offset: usize },

    #[error("Document root must be an object")]
    NotAnObject,

    #[error("Value too large to encode: {0} bytes")]
    TooLarge(usize),

    #[error("Unsupported number: {0}")]
    UnsupportedNumber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = DocumentError::UnknownTag { tag: 0xab, offset: 12 };
        assert_eq!(err.to_string(), "Unknown type tag 0xab at offset 12");
        assert_eq!(
            DocumentError::NotAnObject.to_string(),
            "Document root must be an object"
        );
    }
}
