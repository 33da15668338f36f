//! Order-preserving value codec
//!
//! For two values `a < b` of the same type, `encode(a) < encode(b)` under
//! unsigned lexicographic byte comparison. Index keys are these bytes.
//!
//! | Type   | Layout                                              |
//! |--------|-----------------------------------------------------|
//! | Int    | 8 bytes BE, sign bit flipped                        |
//! | Uint   | 8 bytes BE                                          |
//! | Float  | 8 bytes BE; positive: sign bit flipped, negative: all bits inverted |
//! | Time   | 8 bytes seconds (as Int) + 4 bytes BE sub-second nanos |
//! | String | lowercase UTF-8, no terminator                      |
//! | Bytes  | raw                                                 |

use chrono::DateTime;

use crate::error::{Error, Result};
use crate::value::{Value, ValueType};

const SIGN_BIT: u64 = 1 << 63;

/// Width of an encoded Int/Uint/Float
pub const NUMBER_WIDTH: usize = 8;

/// Width of an encoded Time
pub const TIME_WIDTH: usize = 12;

/// Encode a value into its order-preserving byte form
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    Ok(match value {
        Value::String(s) => fold_case(s).into_bytes(),
        Value::Int(i) => ordered_i64_bytes(*i).to_vec(),
        Value::Uint(u) => u.to_be_bytes().to_vec(),
        Value::Float(f) => ordered_f64_bytes(*f).to_vec(),
        Value::Time(t) => {
            let mut out = Vec::with_capacity(TIME_WIDTH);
            out.extend_from_slice(&ordered_i64_bytes(t.timestamp()));
            out.extend_from_slice(&t.timestamp_subsec_nanos().to_be_bytes());
            out
        }
        Value::Bytes(b) => b.clone(),
    })
}

/// Encode `value` as an index key of type `ty`.
///
/// Applies lossless coercion first; anything else is `WrongType`.
pub fn encode_as(ty: ValueType, value: &Value) -> Result<Vec<u8>> {
    match value.clone().coerce(ty) {
        Some(v) => encode(&v),
        None => Err(Error::WrongType {
            expected: ty,
            actual: value.value_type(),
        }),
    }
}

/// Decode bytes produced by [`encode`] back into a value of type `ty`
pub fn decode(ty: ValueType, bytes: &[u8]) -> Result<Value> {
    match ty {
        ValueType::String => String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| Error::Corruption(format!("encoded string is not UTF-8: {}", e))),
        ValueType::Int => Ok(Value::Int(i64_from_ordered(fixed(bytes)?))),
        ValueType::Uint => Ok(Value::Uint(u64::from_be_bytes(fixed(bytes)?))),
        ValueType::Float => Ok(Value::Float(f64_from_ordered(fixed(bytes)?))),
        ValueType::Time => {
            if bytes.len() != TIME_WIDTH {
                return Err(width_error(ty, bytes.len(), TIME_WIDTH));
            }
            let secs = i64_from_ordered(fixed(&bytes[..NUMBER_WIDTH])?);
            let mut nanos = [0u8; 4];
            nanos.copy_from_slice(&bytes[NUMBER_WIDTH..]);
            DateTime::from_timestamp(secs, u32::from_be_bytes(nanos))
                .map(Value::Time)
                .ok_or_else(|| Error::Corruption("encoded time out of range".to_string()))
        }
        ValueType::Bytes => Ok(Value::Bytes(bytes.to_vec())),
    }
}

/// Canonical case-folded form used for string index keys
pub fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

/// Sign-flipped big-endian bytes of an i64
pub const fn ordered_i64_bytes(value: i64) -> [u8; 8] {
    ((value as u64) ^ SIGN_BIT).to_be_bytes()
}

/// Monotonic byte transform of an f64
pub const fn ordered_f64_bytes(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let ordered = if bits & SIGN_BIT == 0 {
        bits ^ SIGN_BIT
    } else {
        !bits
    };
    ordered.to_be_bytes()
}

fn i64_from_ordered(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_BIT) as i64
}

fn f64_from_ordered(bytes: [u8; 8]) -> f64 {
    let ordered = u64::from_be_bytes(bytes);
    let bits = if ordered & SIGN_BIT != 0 {
        ordered ^ SIGN_BIT
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

fn fixed(bytes: &[u8]) -> Result<[u8; 8]> {
    bytes
        .try_into()
        .map_err(|_| Error::Corruption(format!("expected {} bytes, got {}", NUMBER_WIDTH, bytes.len())))
}

fn width_error(ty: ValueType, got: usize, want: usize) -> Error {
    Error::Corruption(format!(
        "encoded {} must be {} bytes, got {}",
        ty, want, got
    ))
}
