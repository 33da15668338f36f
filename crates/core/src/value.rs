//! Value types for Cellar
//!
//! This module defines:
//! - Value: the scalar types an index can be declared over
//! - ValueType: the tag selected once at index-creation time
//!
//! ## Type Rules
//!
//! - Integers of every width widen to `Int(i64)` or `Uint(u64)`
//! - `f32` widens to `Float(f64)`
//! - Different types are never equal: `Int(1) != Uint(1)`
//! - Float equality follows IEEE-754: `NaN != NaN`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared scalar type of an index or filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// UTF-8 string, indexed case-insensitively
    String,
    /// Signed integer of any width
    Int,
    /// Unsigned integer of any width
    Uint,
    /// Floating point
    Float,
    /// Point in time (UTC)
    Time,
    /// Raw bytes
    Bytes,
}

impl ValueType {
    /// Lowercase name used in messages and config
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Int => "int",
            ValueType::Uint => "uint",
            ValueType::Float => "float",
            ValueType::Time => "time",
            ValueType::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An indexable scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// UTF-8 string
    String(String),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit unsigned integer
    Uint(u64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTC timestamp
    Time(DateTime<Utc>),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl Value {
    /// The type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Int(_) => ValueType::Int,
            Value::Uint(_) => ValueType::Uint,
            Value::Float(_) => ValueType::Float,
            Value::Time(_) => ValueType::Time,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    /// Whether this is the zero value of its type.
    ///
    /// Zero values are never indexed.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::String(s) => s.is_empty(),
            Value::Int(i) => *i == 0,
            Value::Uint(u) => *u == 0,
            Value::Float(f) => *f == 0.0,
            Value::Time(t) => t.timestamp() == 0 && t.timestamp_subsec_nanos() == 0,
            Value::Bytes(b) => b.is_empty(),
        }
    }

    /// Convert into `ty` where the conversion is lossless.
    ///
    /// Lets a filter built from `30i32` compare against a `uint` index.
    pub fn coerce(self, ty: ValueType) -> Option<Value> {
        if self.value_type() == ty {
            return Some(self);
        }
        match (self, ty) {
            (Value::Int(i), ValueType::Uint) => u64::try_from(i).ok().map(Value::Uint),
            (Value::Uint(u), ValueType::Int) => i64::try_from(u).ok().map(Value::Int),
            // compared in 128 bits because `as i64` saturates at 2^63
            (Value::Int(i), ValueType::Float) => {
                let f = i as f64;
                (f as i128 == i as i128).then_some(Value::Float(f))
            }
            (Value::Uint(u), ValueType::Float) => {
                let f = u as f64;
                (f as u128 == u as u128).then_some(Value::Float(f))
            }
            (Value::String(s), ValueType::Bytes) => Some(Value::Bytes(s.into_bytes())),
            _ => None,
        }
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Uint(u64::from(v))
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64);
impl_from_unsigned!(u8, u16, u32, u64);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}
