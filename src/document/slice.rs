//! Read-only views into packed values
//!
//! A `ValueSlice` always points at a validated value, so navigation below
//! never re-checks bounds. Comparison and hashing are representation
//! normalized: `5`, `5.0` and `5u64` compare equal and hash identically.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use super::codec::{self, tags, COMPOUND_HEADER, STRING_HEADER};
use super::errors::DocumentResult;

/// Normalized type classes, in comparison order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    Illegal,
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

/// A validated value inside some byte buffer
#[derive(Clone, Copy)]
pub struct ValueSlice<'a> {
    data: &'a [u8],
    start: usize,
    len: usize,
}

/// Numbers reduced to a canonical form for comparison and hashing
#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i128),
    Float(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Float(f) => f,
        }
    }

    fn from_f64(f: f64) -> Self {
        // Integral doubles collapse onto the integer they represent; -0.0 becomes 0.
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 1.0e38 {
            Numeric::Int(f as i128)
        } else {
            Numeric::Float(f)
        }
    }

    fn compare(self, other: Numeric) -> Ordering {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => a.cmp(&b),
            _ => self.as_f64().total_cmp(&other.as_f64()),
        }
    }
}

impl<'a> ValueSlice<'a> {
    /// Validate the value at `offset` of `data` and return a view of it.
    pub fn validated(data: &'a [u8], offset: usize) -> DocumentResult<Self> {
        let len = codec::validate(data, offset)?;
        Ok(Self {
            data,
            start: offset,
            len,
        })
    }

    /// View of a value whose bounds were validated by the caller.
    pub(crate) fn from_validated(data: &'a [u8], start: usize, len: usize) -> Self {
        Self { data, start, len }
    }

    /// Child value at `pos`, which must lie inside an already validated value.
    fn child(&self, pos: usize) -> ValueSlice<'a> {
        let len = codec::value_size(self.data, pos).unwrap_or(1);
        ValueSlice {
            data: self.data,
            start: pos,
            len,
        }
    }

    /// Byte offset of this value inside its buffer
    pub fn offset(&self) -> usize {
        self.start
    }

    /// Encoded bytes of this value
    pub fn as_bytes(&self) -> &'a [u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Encoded size in bytes
    pub fn byte_size(&self) -> usize {
        self.len
    }

    fn tag(&self) -> u8 {
        self.data[self.start]
    }

    /// Normalized type class
    pub fn value_type(&self) -> ValueType {
        match self.tag() {
            tags::NULL => ValueType::Null,
            tags::FALSE | tags::TRUE => ValueType::Bool,
            tags::INT | tags::UINT | tags::DOUBLE => ValueType::Number,
            tags::STRING => ValueType::String,
            tags::ARRAY => ValueType::Array,
            tags::OBJECT => ValueType::Object,
            _ => ValueType::Illegal,
        }
    }

    pub fn is_null(&self) -> bool {
        self.tag() == tags::NULL
    }

    pub fn is_array(&self) -> bool {
        self.tag() == tags::ARRAY
    }

    pub fn is_object(&self) -> bool {
        self.tag() == tags::OBJECT
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.tag() {
            tags::TRUE => Some(true),
            tags::FALSE => Some(false),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        if self.tag() != tags::STRING {
            return None;
        }
        std::str::from_utf8(&self.data[self.start + STRING_HEADER..self.start + self.len]).ok()
    }

    fn payload_8(&self) -> [u8; 8] {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[self.start + 1..self.start + 9]);
        raw
    }

    fn numeric(&self) -> Option<Numeric> {
        match self.tag() {
            tags::INT => Some(Numeric::Int(i64::from_le_bytes(self.payload_8()) as i128)),
            tags::UINT => Some(Numeric::Int(u64::from_le_bytes(self.payload_8()) as i128)),
            tags::DOUBLE => Some(Numeric::from_f64(f64::from_le_bytes(self.payload_8()))),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.numeric().map(Numeric::as_f64)
    }

    /// Member count of an array or object, 0 otherwise
    pub fn length(&self) -> usize {
        if self.is_array() || self.is_object() {
            let count = &self.data[self.start + 5..self.start + 9];
            u32::from_le_bytes([count[0], count[1], count[2], count[3]]) as usize
        } else {
            0
        }
    }

    /// Iterate the members of an array (empty for other types)
    pub fn array_iter(&self) -> ArrayIter<'a> {
        let remaining = if self.is_array() { self.length() } else { 0 };
        ArrayIter {
            parent: *self,
            cursor: self.start + COMPOUND_HEADER,
            remaining,
        }
    }

    /// Iterate the (key, value) pairs of an object in key order
    pub fn object_iter(&self) -> ObjectIter<'a> {
        let remaining = if self.is_object() { self.length() } else { 0 };
        ObjectIter {
            parent: *self,
            cursor: self.start + COMPOUND_HEADER,
            remaining,
        }
    }

    /// Look up an attribute of an object
    pub fn get(&self, key: &str) -> Option<ValueSlice<'a>> {
        self.object_iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value)
    }

    /// Convert back into JSON (illegal decodes as null)
    pub fn to_json(&self) -> Value {
        codec::decode(self.data, self.start).unwrap_or(Value::Null)
    }

    /// Total order over all values
    pub fn compare(&self, other: &ValueSlice<'_>) -> Ordering {
        let (lt, rt) = (self.value_type(), other.value_type());
        if lt != rt {
            return lt.cmp(&rt);
        }
        match lt {
            ValueType::Illegal | ValueType::Null => Ordering::Equal,
            ValueType::Bool => self.as_bool().cmp(&other.as_bool()),
            ValueType::Number => match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => a.compare(b),
                _ => Ordering::Equal,
            },
            ValueType::String => {
                let a = &self.as_bytes()[STRING_HEADER..];
                let b = &other.as_bytes()[STRING_HEADER..];
                a.cmp(b)
            }
            ValueType::Array => {
                for (a, b) in self.array_iter().zip(other.array_iter()) {
                    let ord = a.compare(&b);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                self.length().cmp(&other.length())
            }
            ValueType::Object => {
                for ((ka, va), (kb, vb)) in self.object_iter().zip(other.object_iter()) {
                    let ord = ka.as_bytes().cmp(kb.as_bytes()).then_with(|| va.compare(&vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                self.length().cmp(&other.length())
            }
        }
    }

    /// Normalized equality, consistent with `normalized_hash`
    pub fn equals(&self, other: &ValueSlice<'_>) -> bool {
        self.compare(other) == Ordering::Equal
    }

    /// Hash that is equal for all values that compare equal
    pub fn normalized_hash(&self, seed: u64) -> u64 {
        match self.value_type() {
            ValueType::Illegal => xxh3_64_with_seed(&[0xf0], seed),
            ValueType::Null => xxh3_64_with_seed(&[0xf1], seed),
            ValueType::Bool => {
                let b = self.as_bool() == Some(true);
                xxh3_64_with_seed(&[0xf2, b as u8], seed)
            }
            ValueType::Number => match self.numeric() {
                Some(Numeric::Int(i)) => {
                    let mut buf = [0u8; 17];
                    buf[0] = 0xf3;
                    buf[1..].copy_from_slice(&i.to_le_bytes());
                    xxh3_64_with_seed(&buf, seed)
                }
                Some(Numeric::Float(f)) => {
                    let mut buf = [0u8; 9];
                    buf[0] = 0xf4;
                    buf[1..].copy_from_slice(&f.to_bits().to_le_bytes());
                    xxh3_64_with_seed(&buf, seed)
                }
                None => seed,
            },
            ValueType::String => {
                let h = xxh3_64_with_seed(&[0xf5], seed);
                xxh3_64_with_seed(&self.as_bytes()[STRING_HEADER..], h)
            }
            ValueType::Array => {
                let mut h = xxh3_64_with_seed(&(self.length() as u64).to_le_bytes(), seed ^ 0xf6);
                for member in self.array_iter() {
                    h = member.normalized_hash(h);
                }
                h
            }
            ValueType::Object => {
                let mut h = xxh3_64_with_seed(&(self.length() as u64).to_le_bytes(), seed ^ 0xf7);
                for (key, value) in self.object_iter() {
                    h = xxh3_64_with_seed(key.as_bytes(), h);
                    h = value.normalized_hash(h);
                }
                h
            }
        }
    }
}

impl fmt::Debug for ValueSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueSlice(@{}: {})", self.start, self.to_json())
    }
}

/// Iterator over array members
pub struct ArrayIter<'a> {
    parent: ValueSlice<'a>,
    cursor: usize,
    remaining: usize,
}

impl<'a> Iterator for ArrayIter<'a> {
    type Item = ValueSlice<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let member = self.parent.child(self.cursor);
        self.cursor += member.len;
        self.remaining -= 1;
        Some(member)
    }
}

/// Iterator over object attributes
pub struct ObjectIter<'a> {
    parent: ValueSlice<'a>,
    cursor: usize,
    remaining: usize,
}

impl<'a> Iterator for ObjectIter<'a> {
    type Item = (&'a str, ValueSlice<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let key = self.parent.child(self.cursor);
        self.cursor += key.len;
        let value = self.parent.child(self.cursor);
        self.cursor += value.len;
        self.remaining -= 1;
        Some((key.as_str().unwrap_or_default(), value))
    }
}
