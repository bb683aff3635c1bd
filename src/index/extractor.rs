//! Key extraction
//!
//! Projects one document onto the attribute paths of an index and produces
//! zero or more index tuples. Every tuple has one value per path; a value is
//! either a slice of the document (carrying its byte offset) or one of the
//! `Null` / `Illegal` sentinels.
//!
//! Rules:
//!
//! - missing and `null` attributes are treated alike
//! - sparse indexes skip documents lacking an indexed attribute; non-sparse
//!   indexes store `Null` for it
//! - an expanding path yields one tuple per array member, in member order
//! - with `allow_partial`, a document whose expansion cannot be completed is
//!   still indexed, with `Illegal` from the first failing path onward

use std::collections::HashMap;

use crate::document::{codec, DocumentId, PackedDocument, ValueSlice};

use super::errors::{IndexError, IndexResult};
use super::path::AttributePath;

/// One projected value of a tuple
#[derive(Debug, Clone, Copy)]
pub enum IndexValue<'a> {
    /// Value found in the document
    Slice(ValueSlice<'a>),
    /// Attribute missing or null in a non-sparse index
    Null,
    /// Position past the failure point of a partially indexed document
    Illegal,
}

impl<'a> IndexValue<'a> {
    /// Encoded bytes of the value
    pub fn as_bytes(&self) -> &'a [u8] {
        match self {
            IndexValue::Slice(slice) => slice.as_bytes(),
            IndexValue::Null => &codec::NULL_BYTES,
            IndexValue::Illegal => &codec::ILLEGAL_BYTES,
        }
    }

    /// View usable for comparison and hashing
    pub fn as_slice(&self) -> ValueSlice<'a> {
        match self {
            IndexValue::Slice(slice) => *slice,
            IndexValue::Null => ValueSlice::from_validated(&codec::NULL_BYTES, 0, 1),
            IndexValue::Illegal => ValueSlice::from_validated(&codec::ILLEGAL_BYTES, 0, 1),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, IndexValue::Null)
    }

    pub fn is_illegal(&self) -> bool {
        matches!(self, IndexValue::Illegal)
    }
}

/// One tuple, arity equal to the number of index paths
pub type IndexTuple<'a> = Vec<IndexValue<'a>>;

/// Behavior switches of the extractor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Skip documents lacking an indexed attribute
    pub sparse: bool,
    /// Index incomplete expansions with `Illegal` fillers
    pub allow_partial: bool,
    /// Skip repeated array members
    pub deduplicate: bool,
    /// Index is unique: repeated members are a constraint violation
    pub unique: bool,
}

/// Project a document onto `paths`.
///
/// Fails only with a unique constraint violation, raised when a unique,
/// non-deduplicating index meets the same array member twice.
pub fn extract_tuples<'a>(
    document: &'a PackedDocument,
    identity: DocumentId,
    paths: &[AttributePath],
    options: ExtractOptions,
) -> IndexResult<Vec<IndexTuple<'a>>> {
    let root = document.root();
    match paths.iter().position(AttributePath::expands) {
        None => Ok(extract_plain(root, paths, options).into_iter().collect()),
        Some(expanding) => extract_expanded(root, identity, paths, expanding, options),
    }
}

/// Follow `segments` from `start`; missing and null both yield None.
fn lookup<'a>(start: ValueSlice<'a>, segments: &[String]) -> Option<ValueSlice<'a>> {
    let mut current = start;
    for segment in segments {
        current = current.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn extract_plain<'a>(
    root: ValueSlice<'a>,
    paths: &[AttributePath],
    options: ExtractOptions,
) -> Option<IndexTuple<'a>> {
    let mut tuple = Vec::with_capacity(paths.len());
    for path in paths {
        match lookup(root, path.segments()) {
            Some(value) => tuple.push(IndexValue::Slice(value)),
            None if options.sparse => return None,
            None => tuple.push(IndexValue::Null),
        }
    }
    Some(tuple)
}

fn extract_expanded<'a>(
    root: ValueSlice<'a>,
    identity: DocumentId,
    paths: &[AttributePath],
    expanding: usize,
    options: ExtractOptions,
) -> IndexResult<Vec<IndexTuple<'a>>> {
    let resolved: Vec<Option<ValueSlice<'a>>> = paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            if i == expanding {
                None
            } else {
                lookup(root, path.segments())
            }
        })
        .collect();

    let array = lookup(root, paths[expanding].prefix()).filter(|v| v.is_array() && v.length() > 0);

    let failure = (0..paths.len()).find(|&i| {
        if i == expanding {
            array.is_none()
        } else {
            resolved[i].is_none()
        }
    });

    let mut illegal_from = None;
    if let Some(position) = failure {
        if options.allow_partial {
            illegal_from = Some(position);
        } else if options.sparse {
            return Ok(Vec::new());
        }
    }

    let build = |expanded: IndexValue<'a>| -> IndexTuple<'a> {
        (0..paths.len())
            .map(|i| {
                if illegal_from.is_some_and(|f| i >= f) {
                    IndexValue::Illegal
                } else if i == expanding {
                    expanded
                } else {
                    resolved[i].map_or(IndexValue::Null, IndexValue::Slice)
                }
            })
            .collect()
    };

    let Some(array) = array else {
        return Ok(vec![build(IndexValue::Null)]);
    };

    let suffix = paths[expanding].suffix();
    let mut seen: HashMap<u64, Vec<ValueSlice<'a>>> = HashMap::new();
    let mut tuples = Vec::new();

    for member in array.array_iter() {
        if options.deduplicate || options.unique {
            let candidates = seen.entry(member.normalized_hash(0)).or_default();
            if candidates.iter().any(|c| c.equals(&member)) {
                if options.deduplicate {
                    continue;
                }
                return Err(IndexError::unique_violation(identity));
            }
            candidates.push(member);
        }

        let expanded = match lookup(member, suffix) {
            Some(value) => IndexValue::Slice(value),
            None if options.sparse && illegal_from.is_none() => continue,
            None => IndexValue::Null,
        };
        tuples.push(build(expanded));
    }

    Ok(tuples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::path::parse_paths;
    use serde_json::{json, Value};

    fn run(doc: Value, fields: &[&str], options: ExtractOptions) -> IndexResult<Vec<Vec<Value>>> {
        let packed = PackedDocument::from_json(&doc).unwrap();
        let paths = parse_paths(fields).unwrap();
        let tuples = extract_tuples(&packed, DocumentId(1), &paths, options)?;
        Ok(tuples
            .iter()
            .map(|t| {
                t.iter()
                    .map(|v| match v {
                        IndexValue::Slice(s) => s.to_json(),
                        IndexValue::Null => Value::Null,
                        IndexValue::Illegal => json!("<illegal>"),
                    })
                    .collect()
            })
            .collect())
    }

    fn opts(sparse: bool, allow_partial: bool, deduplicate: bool) -> ExtractOptions {
        ExtractOptions {
            sparse,
            allow_partial,
            deduplicate,
            unique: false,
        }
    }

    #[test]
    fn test_plain_tuple() {
        let doc = json!({"a": 5, "b": {"c": "x"}});
        let out = run(doc, &["a", "b.c"], opts(false, false, true)).unwrap();
        assert_eq!(out, vec![vec![json!(5), json!("x")]]);
    }

    #[test]
    fn test_sparse_skips_missing() {
        let out = run(json!({"a": 5}), &["a", "b"], opts(true, false, true)).unwrap();
        assert!(out.is_empty());
        let out = run(json!({"a": 5, "b": null}), &["a", "b"], opts(true, false, true)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_non_sparse_substitutes_null() {
        let out = run(json!({"a": 5}), &["a", "b"], opts(false, false, true)).unwrap();
        assert_eq!(out, vec![vec![json!(5), Value::Null]]);
    }

    #[test]
    fn test_expansion_dedup() {
        let out = run(json!({"a": [5, 6, 5]}), &["a[*]"], opts(false, false, true)).unwrap();
        assert_eq!(out, vec![vec![json!(5)], vec![json!(6)]]);
    }

    #[test]
    fn test_expansion_without_dedup() {
        let out = run(json!({"a": [5, 6, 5]}), &["a[*]"], opts(false, false, false)).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_dedup_normalizes_numbers() {
        let out = run(json!({"a": [1, 1.0, 2]}), &["a[*]"], opts(false, false, true)).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_unique_without_dedup_rejects_repeats() {
        let options = ExtractOptions {
            unique: true,
            ..opts(false, false, false)
        };
        let err = run(json!({"a": [1, 2, 1]}), &["a[*]"], options).unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(err.conflicting(), Some(DocumentId(1)));
    }

    #[test]
    fn test_expansion_with_suffix_and_other_paths() {
        let doc = json!({"tags": [{"n": "x"}, {"n": "y"}, {"m": 1}], "owner": 7});
        let out = run(doc.clone(), &["owner", "tags[*].n"], opts(false, false, true)).unwrap();
        assert_eq!(
            out,
            vec![
                vec![json!(7), json!("x")],
                vec![json!(7), json!("y")],
                vec![json!(7), Value::Null],
            ]
        );

        let sparse = run(doc, &["owner", "tags[*].n"], opts(true, false, true)).unwrap();
        assert_eq!(sparse.len(), 2);
    }

    #[test]
    fn test_non_array_falls_back() {
        let doc = json!({"a": "scalar"});
        assert!(run(doc.clone(), &["a[*]"], opts(true, false, true)).unwrap().is_empty());
        assert_eq!(
            run(doc.clone(), &["a[*]"], opts(false, false, true)).unwrap(),
            vec![vec![Value::Null]]
        );
        assert_eq!(
            run(doc, &["a[*]"], opts(true, true, true)).unwrap(),
            vec![vec![json!("<illegal>")]]
        );
    }

    #[test]
    fn test_empty_array_falls_back() {
        let doc = json!({"a": []});
        assert!(run(doc.clone(), &["a[*]"], opts(true, false, true)).unwrap().is_empty());
        assert_eq!(run(doc, &["a[*]"], opts(false, false, true)).unwrap().len(), 1);
    }

    #[test]
    fn test_partial_fills_illegal_from_failure() {
        let doc = json!({"x": 1, "tags": [1, 2]});
        // "y" is missing and comes after the expanding path
        let out = run(doc.clone(), &["x", "tags[*]", "y"], opts(true, true, true)).unwrap();
        assert_eq!(
            out,
            vec![
                vec![json!(1), json!(1), json!("<illegal>")],
                vec![json!(1), json!(2), json!("<illegal>")],
            ]
        );

        // "y" comes first: single tuple, everything illegal
        let out = run(doc, &["y", "tags[*]"], opts(true, true, true)).unwrap();
        assert_eq!(out, vec![vec![json!("<illegal>"), json!("<illegal>")]]);
    }

    #[test]
    fn test_member_order_preserved() {
        let out = run(json!({"a": [3, 1, 2]}), &["a[*]"], opts(false, false, true)).unwrap();
        assert_eq!(out, vec![vec![json!(3)], vec![json!(1)], vec![json!(2)]]);
    }
}
