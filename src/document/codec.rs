//! Packed value encoding
//!
//! Documents are stored in a compact, self-describing binary form so that an
//! index entry can refer to a sub-value by byte offset instead of copying it.
//!
//! Layout (all integers little-endian):
//!
//! | Tag  | Value            | Payload                                        |
//! |------|------------------|------------------------------------------------|
//! | 0x00 | illegal          | none (index sentinel only)                     |
//! | 0x01 | null             | none                                           |
//! | 0x02 | false            | none                                           |
//! | 0x03 | true             | none                                           |
//! | 0x04 | int              | i64                                            |
//! | 0x05 | uint > i64::MAX  | u64                                            |
//! | 0x06 | double           | f64                                            |
//! | 0x07 | string           | u32 length, UTF-8 bytes                        |
//! | 0x08 | array            | u32 total size, u32 count, members             |
//! | 0x09 | object           | u32 total size, u32 count, sorted (key, value) |

use serde_json::{Map, Number, Value};

use super::errors::{DocumentError, DocumentResult};

/// Type tags of the packed encoding
pub mod tags {
    pub const ILLEGAL: u8 = 0x00;
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;
    pub const INT: u8 = 0x04;
    pub const UINT: u8 = 0x05;
    pub const DOUBLE: u8 = 0x06;
    pub const STRING: u8 = 0x07;
    pub const ARRAY: u8 = 0x08;
    pub const OBJECT: u8 = 0x09;
}

/// Size of the header in front of array and object members
pub(crate) const COMPOUND_HEADER: usize = 9;

/// Size of the header in front of string bytes
pub(crate) const STRING_HEADER: usize = 5;

/// Encoding of the null value
pub const NULL_BYTES: [u8; 1] = [tags::NULL];

/// Encoding of the illegal sentinel
pub const ILLEGAL_BYTES: [u8; 1] = [tags::ILLEGAL];

/// Encode a JSON value into a fresh buffer.
pub fn encode(value: &Value) -> DocumentResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    encode_into(&mut out, value)?;
    Ok(out)
}

/// Append the encoding of a JSON value to `out`.
///
/// Object keys are written in sorted order so that equal objects have equal
/// encodings regardless of how the input map was built.
pub fn encode_into(out: &mut Vec<u8>, value: &Value) -> DocumentResult<()> {
    match value {
        Value::Null => out.push(tags::NULL),
        Value::Bool(false) => out.push(tags::FALSE),
        Value::Bool(true) => out.push(tags::TRUE),
        Value::Number(n) => encode_number(out, n)?,
        Value::String(s) => encode_string(out, s)?,
        Value::Array(items) => {
            let start = begin_compound(out, tags::ARRAY, items.len())?;
            for item in items {
                encode_into(out, item)?;
            }
            finish_compound(out, start)?;
        }
        Value::Object(map) => encode_object(out, map)?,
    }
    Ok(())
}

fn encode_number(out: &mut Vec<u8>, n: &Number) -> DocumentResult<()> {
    if let Some(i) = n.as_i64() {
        out.push(tags::INT);
        out.extend_from_slice(&i.to_le_bytes());
    } else if let Some(u) = n.as_u64() {
        out.push(tags::UINT);
        out.extend_from_slice(&u.to_le_bytes());
    } else if let Some(f) = n.as_f64() {
        out.push(tags::DOUBLE);
        out.extend_from_slice(&f.to_le_bytes());
    } else {
        return Err(DocumentError::UnsupportedNumber(n.to_string()));
    }
    Ok(())
}

fn encode_string(out: &mut Vec<u8>, s: &str) -> DocumentResult<()> {
    let len = u32::try_from(s.len()).map_err(|_| DocumentError::TooLarge(s.len()))?;
    out.push(tags::STRING);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_object(out: &mut Vec<u8>, map: &Map<String, Value>) -> DocumentResult<()> {
    let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
    pairs.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let start = begin_compound(out, tags::OBJECT, pairs.len())?;
    for (key, value) in pairs {
        encode_string(out, key)?;
        encode_into(out, value)?;
    }
    finish_compound(out, start)
}

fn begin_compound(out: &mut Vec<u8>, tag: u8, count: usize) -> DocumentResult<usize> {
    let count = u32::try_from(count).map_err(|_| DocumentError::TooLarge(count))?;
    let start = out.len();
    out.push(tag);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    Ok(start)
}

fn finish_compound(out: &mut [u8], start: usize) -> DocumentResult<()> {
    let size = out.len() - start;
    let size32 = u32::try_from(size).map_err(|_| DocumentError::TooLarge(size))?;
    out[start + 1..start + 5].copy_from_slice(&size32.to_le_bytes());
    Ok(())
}

/// Read a little-endian u32 at `pos`, bounds checked.
pub(crate) fn read_u32(data: &[u8], pos: usize) -> DocumentResult<u32> {
    let bytes = data
        .get(pos..pos + 4)
        .ok_or(DocumentError::Truncated(pos))?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(raw))
}

/// Read 8 raw bytes at `pos`, bounds checked.
pub(crate) fn read_8(data: &[u8], pos: usize) -> DocumentResult<[u8; 8]> {
    let bytes = data
        .get(pos..pos + 8)
        .ok_or(DocumentError::Truncated(pos))?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(raw)
}

/// Byte size of the value starting at `pos`, without validating its members.
pub(crate) fn value_size(data: &[u8], pos: usize) -> DocumentResult<usize> {
    let tag = *data.get(pos).ok_or(DocumentError::Truncated(pos))?;
    let size = match tag {
        tags::ILLEGAL | tags::NULL | tags::FALSE | tags::TRUE => 1,
        tags::INT | tags::UINT | tags::DOUBLE => 9,
        tags::STRING => STRING_HEADER + read_u32(data, pos + 1)? as usize,
        tags::ARRAY | tags::OBJECT => read_u32(data, pos + 1)? as usize,
        other => return Err(DocumentError::UnknownTag { tag: other, offset: pos }),
    };
    if pos + size > data.len() {
        return Err(DocumentError::Truncated(pos));
    }
    Ok(size)
}

/// Fully validate the value at `pos` and return its byte size.
///
/// After validation every read inside `[pos, pos + size)` is in bounds and
/// every string is valid UTF-8.
pub(crate) fn validate(data: &[u8], pos: usize) -> DocumentResult<usize> {
    let size = value_size(data, pos)?;
    match data[pos] {
        tags::STRING => {
            std::str::from_utf8(&data[pos + STRING_HEADER..pos + size])
                .map_err(|_| DocumentError::InvalidUtf8(pos))?;
        }
        tags::ARRAY | tags::OBJECT => {
            if size < COMPOUND_HEADER {
                return Err(DocumentError::InvalidSize { size, offset: pos });
            }
            let is_object = data[pos] == tags::OBJECT;
            let count = read_u32(data, pos + 5)? as usize;
            let end = pos + size;
            let mut cursor = pos + COMPOUND_HEADER;
            for _ in 0..count {
                if is_object {
                    if data.get(cursor) != Some(&tags::STRING) {
                        return Err(DocumentError::InvalidSize { size, offset: pos });
                    }
                    cursor += validate(&data[..end], cursor)?;
                }
                cursor += validate(&data[..end], cursor)?;
            }
            if cursor != end {
                return Err(DocumentError::InvalidSize { size, offset: pos });
            }
        }
        _ => {}
    }
    Ok(size)
}

/// Decode the (validated) value at `pos` back into JSON.
///
/// The illegal sentinel has no JSON form and decodes as null.
pub(crate) fn decode(data: &[u8], pos: usize) -> DocumentResult<Value> {
    let tag = *data.get(pos).ok_or(DocumentError::Truncated(pos))?;
    let value = match tag {
        tags::ILLEGAL | tags::NULL => Value::Null,
        tags::FALSE => Value::Bool(false),
        tags::TRUE => Value::Bool(true),
        tags::INT => Value::from(i64::from_le_bytes(read_8(data, pos + 1)?)),
        tags::UINT => Value::from(u64::from_le_bytes(read_8(data, pos + 1)?)),
        tags::DOUBLE => {
            let f = f64::from_le_bytes(read_8(data, pos + 1)?);
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        tags::STRING => {
            let size = value_size(data, pos)?;
            let s = std::str::from_utf8(&data[pos + STRING_HEADER..pos + size])
                .map_err(|_| DocumentError::InvalidUtf8(pos))?;
            Value::String(s.to_string())
        }
        tags::ARRAY => {
            let count = read_u32(data, pos + 5)? as usize;
            let mut cursor = pos + COMPOUND_HEADER;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode(data, cursor)?);
                cursor += value_size(data, cursor)?;
            }
            Value::Array(items)
        }
        tags::OBJECT => {
            let count = read_u32(data, pos + 5)? as usize;
            let mut cursor = pos + COMPOUND_HEADER;
            let mut map = Map::new();
            for _ in 0..count {
                let key = match decode(data, cursor)? {
                    Value::String(s) => s,
                    _ => return Err(DocumentError::InvalidSize { size: 0, offset: cursor }),
                };
                cursor += value_size(data, cursor)?;
                let value = decode(data, cursor)?;
                cursor += value_size(data, cursor)?;
                map.insert(key, value);
            }
            Value::Object(map)
        }
        other => return Err(DocumentError::UnknownTag { tag: other, offset: pos }),
    };
    Ok(value)
}
