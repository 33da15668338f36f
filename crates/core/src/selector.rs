//! Field selectors
//!
//! A `Selector` is an ordered list of field names. `resolve` walks a record
//! field by field and extracts the scalar to index. Records that do not carry
//! the field (or carry it with another type) are skipped, never rejected.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::{Value, ValueType};

/// Structured record shape a selector can walk
pub trait Document {
    /// Nested field by name, if this node is an object that has it
    fn field(&self, name: &str) -> Option<&Self>;

    /// This node as a scalar of type `ty`, if its runtime type matches
    fn scalar(&self, ty: ValueType) -> Option<Value>;
}

impl Document for serde_json::Value {
    fn field(&self, name: &str) -> Option<&Self> {
        self.as_object()?.get(name)
    }

    fn scalar(&self, ty: ValueType) -> Option<Value> {
        use serde_json::Value as Json;

        match (ty, self) {
            (ValueType::String, Json::String(s)) => Some(Value::String(s.clone())),
            (ValueType::Int, Json::Number(n)) => n.as_i64().map(Value::Int),
            (ValueType::Uint, Json::Number(n)) => n.as_u64().map(Value::Uint),
            (ValueType::Float, Json::Number(n)) => n.as_f64().map(Value::Float),
            (ValueType::Time, Json::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| Value::Time(t.with_timezone(&Utc))),
            (ValueType::Bytes, Json::Array(items)) => items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(Value::Bytes),
            (ValueType::Bytes, Json::String(s)) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .ok()
                .map(Value::Bytes),
            _ => None,
        }
    }
}

/// Path of field names identifying an indexable value inside a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector(Vec<String>);

impl Selector {
    /// Build a selector from field names
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selector(fields.into_iter().map(Into::into).collect())
    }

    /// Parse a dotted path such as `"address.city"`
    pub fn parse(path: &str) -> Self {
        Selector::new(path.split('.').filter(|f| !f.is_empty()))
    }

    /// Field names in walk order
    pub fn fields(&self) -> &[String] {
        &self.0
    }

    /// Whether the selector names no field at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve the selector against `doc`.
    ///
    /// Returns `None` when a field is missing, an intermediate is not an
    /// object, the final value has another type, or the value is zero.
    pub fn resolve<D: Document + ?Sized>(&self, doc: &D, ty: ValueType) -> Option<Value> {
        let (last, path) = self.0.split_last()?;
        let mut node = doc;
        for name in path {
            node = node.field(name)?;
        }
        let value = node.field(last)?.scalar(ty)?;
        if value.is_zero() {
            return None;
        }
        Some(value)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for Selector {
    fn from(path: &str) -> Self {
        Selector::parse(path)
    }
}

impl<const N: usize> From<[&str; N]> for Selector {
    fn from(fields: [&str; N]) -> Self {
        Selector::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn user() -> serde_json::Value {
        json!({
            "name": "Alice",
            "age": 30,
            "score": 12.5,
            "balance": -4,
            "created": "2024-01-02T03:04:05Z",
            "avatar": [1, 2, 3],
            "address": { "city": "Lyon", "zip": 69001 },
            "nickname": "",
            "visits": 0
        })
    }

    #[test]
    fn test_resolve_top_level() {
        let sel = Selector::parse("name");
        assert_eq!(
            sel.resolve(&user(), ValueType::String),
            Some(Value::String("Alice".into()))
        );
    }

    #[test]
    fn test_resolve_nested() {
        let sel = Selector::from(["address", "city"]);
        assert_eq!(
            sel.resolve(&user(), ValueType::String),
            Some(Value::String("Lyon".into()))
        );
        assert_eq!(sel.to_string(), "address.city");
    }

    #[test]
    fn test_missing_intermediate_is_none() {
        let sel = Selector::parse("contact.email");
        assert_eq!(sel.resolve(&user(), ValueType::String), None);
    }

    #[test]
    fn test_non_object_intermediate_is_none() {
        let sel = Selector::parse("name.first");
        assert_eq!(sel.resolve(&user(), ValueType::String), None);
    }

    #[test]
    fn test_type_mismatch_is_none() {
        assert_eq!(Selector::parse("age").resolve(&user(), ValueType::String), None);
        assert_eq!(Selector::parse("score").resolve(&user(), ValueType::Int), None);
        assert_eq!(Selector::parse("balance").resolve(&user(), ValueType::Uint), None);
    }

    #[test]
    fn test_numeric_kinds() {
        let doc = user();
        assert_eq!(Selector::parse("age").resolve(&doc, ValueType::Int), Some(Value::Int(30)));
        assert_eq!(Selector::parse("age").resolve(&doc, ValueType::Uint), Some(Value::Uint(30)));
        assert_eq!(
            Selector::parse("age").resolve(&doc, ValueType::Float),
            Some(Value::Float(30.0))
        );
    }

    #[test]
    fn test_zero_values_are_absent() {
        let doc = user();
        assert_eq!(Selector::parse("nickname").resolve(&doc, ValueType::String), None);
        assert_eq!(Selector::parse("visits").resolve(&doc, ValueType::Int), None);
    }

    #[test]
    fn test_time_and_bytes() {
        let doc = user();
        assert_eq!(
            Selector::parse("created").resolve(&doc, ValueType::Time),
            Some(Value::Time(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()))
        );
        assert_eq!(
            Selector::parse("avatar").resolve(&doc, ValueType::Bytes),
            Some(Value::Bytes(vec![1, 2, 3]))
        );
    }

    #[test]
    fn test_empty_selector_resolves_nothing() {
        assert!(Selector::parse("").is_empty());
        assert_eq!(Selector::parse("").resolve(&user(), ValueType::String), None);
    }
}
