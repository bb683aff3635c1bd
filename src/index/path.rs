//! Attribute paths
//!
//! An attribute path is a dotted list of field names with at most one
//! array-expansion marker, written `[*]`:
//!
//! - `a`            plain attribute
//! - `a.b.c`        nested attribute
//! - `tags[*]`      every member of the array `tags`
//! - `tags[*].name` attribute `name` of every member of `tags`

use std::fmt;

use super::errors::{IndexError, IndexResult};

const EXPAND_MARKER: &str = "[*]";

/// A parsed attribute path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    segments: Vec<String>,
    /// Number of leading segments that lead to the array being expanded
    expand_at: Option<usize>,
}

impl AttributePath {
    /// Parse a path such as `a.b[*].c`.
    pub fn parse(path: &str) -> IndexResult<Self> {
        if path.is_empty() {
            return Err(IndexError::bad_parameter("empty attribute path"));
        }

        let mut segments = Vec::new();
        let mut expand_at = None;

        for raw in path.split('.') {
            let (name, expands) = match raw.strip_suffix(EXPAND_MARKER) {
                Some(name) => (name, true),
                None => (raw, false),
            };
            if name.is_empty() || name.contains('[') || name.contains(']') {
                return Err(IndexError::bad_parameter(format!(
                    "invalid attribute path '{}'",
                    path
                )));
            }
            segments.push(name.to_string());
            if expands {
                if expand_at.is_some() {
                    return Err(IndexError::bad_parameter(format!(
                        "attribute path '{}' expands more than one array",
                        path
                    )));
                }
                expand_at = Some(segments.len());
            }
        }

        Ok(Self { segments, expand_at })
    }

    /// Build a non-expanding path from segments.
    pub fn from_segments<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            expand_at: None,
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this path iterates an array
    pub fn expands(&self) -> bool {
        self.expand_at.is_some()
    }

    /// Segments up to and including the expanded array
    pub fn prefix(&self) -> &[String] {
        match self.expand_at {
            Some(at) => &self.segments[..at],
            None => &self.segments,
        }
    }

    /// Segments applied to every member of the expanded array
    pub fn suffix(&self) -> &[String] {
        match self.expand_at {
            Some(at) => &self.segments[at..],
            None => &[],
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment)?;
            if self.expand_at == Some(i + 1) {
                write!(f, "{}", EXPAND_MARKER)?;
            }
        }
        Ok(())
    }
}

/// Parse and validate the paths of one index definition.
///
/// At most one path of an index may expand an array.
pub fn parse_paths<S: AsRef<str>>(fields: &[S]) -> IndexResult<Vec<AttributePath>> {
    if fields.is_empty() {
        return Err(IndexError::bad_parameter("index needs at least one attribute path"));
    }
    let paths = fields
        .iter()
        .map(|f| AttributePath::parse(f.as_ref()))
        .collect::<IndexResult<Vec<_>>>()?;
    if paths.iter().filter(|p| p.expands()).count() > 1 {
        return Err(IndexError::bad_parameter(
            "at most one attribute path of an index may expand an array",
        ));
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let path = AttributePath::parse("a.b").unwrap();
        assert_eq!(path.segments(), &["a".to_string(), "b".to_string()]);
        assert!(!path.expands());
        assert_eq!(path.prefix().len(), 2);
        assert!(path.suffix().is_empty());
    }

    #[test]
    fn test_parse_expansion() {
        let path = AttributePath::parse("tags[*].name").unwrap();
        assert!(path.expands());
        assert_eq!(path.prefix(), &["tags".to_string()]);
        assert_eq!(path.suffix(), &["name".to_string()]);
        assert_eq!(path.to_string(), "tags[*].name");

        let leaf = AttributePath::parse("a[*]").unwrap();
        assert_eq!(leaf.prefix(), &["a".to_string()]);
        assert!(leaf.suffix().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(AttributePath::parse("").is_err());
        assert!(AttributePath::parse("a..b").is_err());
        assert!(AttributePath::parse("a[*].b[*]").is_err());
        assert!(AttributePath::parse("a[1]").is_err());
    }

    #[test]
    fn test_only_one_expanding_path() {
        assert!(parse_paths(&["a[*]", "b"]).is_ok());
        assert!(parse_paths(&["a[*]", "b[*]"]).is_err());
        assert!(parse_paths::<&str>(&[]).is_err());
    }
}
