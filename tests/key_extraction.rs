//! Key Extraction Tests
//!
//! Tests for how documents project onto index tuples:
//! - Missing attributes index as null unless the index is sparse
//! - Array expansion yields one tuple per distinct member
//! - Partial expansions keep their prefix when allowed

use aerodb_hashindex::document::{DocumentId, PackedDocument};
use aerodb_hashindex::index::{extract_tuples, parse_paths, ExtractOptions, IndexValue};
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn tuples(doc: Value, fields: &[&str], options: ExtractOptions) -> Vec<Vec<Value>> {
    let packed = PackedDocument::from_json(&doc).unwrap();
    let paths = parse_paths(fields).unwrap();
    extract_tuples(&packed, DocumentId(1), &paths, options)
        .unwrap()
        .iter()
        .map(|tuple| {
            tuple
                .iter()
                .map(|value| match value {
                    IndexValue::Slice(slice) => slice.to_json(),
                    IndexValue::Null => Value::Null,
                    IndexValue::Illegal => json!("illegal"),
                })
                .collect()
        })
        .collect()
}

fn options(sparse: bool, allow_partial: bool) -> ExtractOptions {
    ExtractOptions {
        sparse,
        allow_partial,
        deduplicate: true,
        unique: false,
    }
}

// =============================================================================
// Sparsity Tests
// =============================================================================

/// Missing attributes become null on a non-sparse index.
#[test]
fn test_missing_attribute_indexes_null() {
    let out = tuples(json!({"a": 1}), &["a", "b"], options(false, false));
    assert_eq!(out, vec![vec![json!(1), Value::Null]]);
}

/// A sparse index skips documents lacking any attribute.
#[test]
fn test_sparse_skips_document() {
    assert!(tuples(json!({"a": 1}), &["a", "b"], options(true, false)).is_empty());
    assert!(tuples(json!({"a": 1, "b": null}), &["a", "b"], options(true, false)).is_empty());
    assert_eq!(tuples(json!({"a": 1, "b": 2}), &["a", "b"], options(true, false)).len(), 1);
}

// =============================================================================
// Expansion Tests
// =============================================================================

/// One tuple per distinct member, other attributes repeated.
#[test]
fn test_expansion_arity() {
    let out = tuples(
        json!({"user": "u", "tags": [{"n": 1}, {"n": 2}, {"n": 1}]}),
        &["user", "tags[*].n"],
        options(false, false),
    );
    assert_eq!(out, vec![vec![json!("u"), json!(1)], vec![json!("u"), json!(2)]]);
}

/// Without deduplication every member yields a tuple.
#[test]
fn test_expansion_without_deduplication() {
    let mut opts = options(false, false);
    opts.deduplicate = false;
    let out = tuples(json!({"a": [1, 1, 2]}), &["a[*]"], opts);
    assert_eq!(out.len(), 3);
}

/// A unique, non-deduplicating index rejects repeated members.
#[test]
fn test_repeated_member_violates_unique() {
    let packed = PackedDocument::from_json(&json!({"a": [1, 2, 1]})).unwrap();
    let paths = parse_paths(&["a[*]"]).unwrap();
    let opts = ExtractOptions {
        sparse: false,
        allow_partial: false,
        deduplicate: false,
        unique: true,
    };
    let err = extract_tuples(&packed, DocumentId(9), &paths, opts).unwrap_err();
    assert!(err.is_unique_violation());
    assert_eq!(err.conflicting(), Some(DocumentId(9)));
}

/// A missing or empty array indexes one null tuple unless sparse.
#[test]
fn test_missing_array() {
    assert_eq!(tuples(json!({"b": 1}), &["a[*]"], options(false, false)), vec![vec![Value::Null]]);
    assert_eq!(tuples(json!({"a": []}), &["a[*]"], options(false, false)), vec![vec![Value::Null]]);
    assert!(tuples(json!({"a": []}), &["a[*]"], options(true, false)).is_empty());
}

/// Members lacking the suffix are skipped on sparse indexes.
#[test]
fn test_member_without_suffix() {
    let doc = json!({"a": [{"b": 1}, {"c": 2}]});
    assert_eq!(tuples(doc.clone(), &["a[*].b"], options(true, false)), vec![vec![json!(1)]]);
    assert_eq!(
        tuples(doc, &["a[*].b"], options(false, false)),
        vec![vec![json!(1)], vec![Value::Null]]
    );
}

/// Partial expansion keeps the prefix before the first missing attribute.
#[test]
fn test_partial_expansion() {
    let out = tuples(json!({"a": 1, "list": [1, 2]}), &["a", "b", "list[*]"], options(true, true));
    assert_eq!(
        out,
        vec![
            vec![json!(1), json!("illegal"), json!("illegal")],
            vec![json!(1), json!("illegal"), json!("illegal")],
        ]
    );
}
