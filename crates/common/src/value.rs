//! Runtime value representation for the Quill VM.
//!
//! Values live on the stack, in registers, in persistent slots, in the
//! dynamic store and inside immediates.

use std::collections::BTreeMap;
use std::fmt;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::kind::ValueKind;

/// Largest integer an f64 represents exactly (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Runtime value representation.
///
/// Equality is strict: values of different kinds are never equal, so
/// `Number(1.0) != BigInt(1)`, and `NaN` is not equal to itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Missing value: unset slots, unknown keys, out-of-range indices.
    #[default]
    Absent,
    /// Explicit null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// IEEE 754 64-bit float. Integers are represented exactly up to 2^53.
    Number(f64),
    /// Arbitrary-precision integer.
    BigInt(BigInt),
    /// UTF-8 string.
    String(String),
    /// Ordered array.
    Array(Vec<Value>),
    /// String-keyed map with deterministic (sorted) iteration order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Absent => ValueKind::Absent,
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::BigInt(_) => ValueKind::BigInt,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Truthiness: exactly absent, null, numeric zero and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Absent | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            _ => true,
        }
    }

    /// Returns true for [`Value::Absent`].
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The float payload, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Interpret this value as a non-negative integer index.
    ///
    /// Accepts integral, finite, non-negative numbers and big integers
    /// that fit in `usize`.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Value::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => {
                n.to_usize()
            }
            Value::BigInt(b) => b.to_usize(),
            _ => None,
        }
    }

    /// Interpret this value as a signed integer offset.
    pub fn as_offset(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 => n.to_i64(),
            Value::BigInt(b) => b.to_i64(),
            _ => None,
        }
    }

    /// Render this value as a map key or label identifier.
    ///
    /// Strings are used verbatim; numbers use their canonical decimal form.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) if n.is_finite() => Some(format_number(*n)),
            Value::BigInt(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Convert to a JSON document.
    ///
    /// Absent becomes `null`, big integers become decimal strings, and
    /// integral numbers are written without a fractional part.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Absent | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::BigInt(b) => Json::String(b.to_string()),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Build a value from a JSON document. JSON numbers become `Number`.
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Length of the compact JSON rendering, used for payload gas.
    pub fn json_len(&self) -> usize {
        self.to_json().to_string().len()
    }
}

/// Canonical decimal form of a number: `3` rather than `3.0`.
pub fn format_number(n: f64) -> String {
    format!("{n}")
}

fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Json::Number)
            .unwrap_or(Json::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => f.write_str("absent"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::BigInt(b) => write!(f, "{b}"),
            Value::String(s) => f.write_str(s),
            Value::Array(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<BigInt> for Value {
    fn from(b: BigInt) -> Self {
        Value::BigInt(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn kinds() {
        assert_eq!(Value::Absent.kind(), ValueKind::Absent);
        assert_eq!(Value::Null.kind(), ValueKind::Null);
        assert_eq!(Value::from(true).kind(), ValueKind::Bool);
        assert_eq!(Value::from(1.5).kind(), ValueKind::Number);
        assert_eq!(Value::from(BigInt::from(7)).kind(), ValueKind::BigInt);
        assert_eq!(Value::from("x").kind(), ValueKind::String);
        assert_eq!(Value::Array(vec![]).kind(), ValueKind::Array);
        assert_eq!(map(&[]).kind(), ValueKind::Map);
    }

    #[test]
    fn falsy_set_is_exact() {
        assert!(!Value::Absent.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(-0.0).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
    }

    #[test]
    fn everything_else_is_truthy() {
        assert!(Value::from("").is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(map(&[]).is_truthy());
        assert!(Value::from(BigInt::from(0)).is_truthy());
        assert!(Value::Number(f64::NAN).is_truthy());
        assert!(Value::Bool(true).is_truthy());
    }

    #[test]
    fn strict_equality() {
        assert_eq!(Value::from(3), Value::Number(3.0));
        assert_ne!(Value::from(1), Value::from(BigInt::from(1)));
        assert_ne!(Value::from("1"), Value::from(1));
        assert_ne!(Value::Null, Value::Absent);
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn index_conversion() {
        assert_eq!(Value::from(3).as_index(), Some(3));
        assert_eq!(Value::from(BigInt::from(9)).as_index(), Some(9));
        assert_eq!(Value::from(-1).as_index(), None);
        assert_eq!(Value::from(1.5).as_index(), None);
        assert_eq!(Value::from("3").as_index(), None);
        assert_eq!(Value::Number(f64::INFINITY).as_index(), None);
    }

    #[test]
    fn offset_conversion() {
        assert_eq!(Value::from(-4).as_offset(), Some(-4));
        assert_eq!(Value::from(2.5).as_offset(), None);
    }

    #[test]
    fn key_rendering() {
        assert_eq!(Value::from("name").as_key().as_deref(), Some("name"));
        assert_eq!(Value::from(3).as_key().as_deref(), Some("3"));
        assert_eq!(Value::from(2.5).as_key().as_deref(), Some("2.5"));
        assert_eq!(Value::from(BigInt::from(12)).as_key().as_deref(), Some("12"));
        assert_eq!(Value::Bool(true).as_key(), None);
        assert_eq!(Value::Number(f64::NAN).as_key(), None);
    }

    #[test]
    fn display_scalars() {
        assert_eq!(Value::from(8).to_string(), "8");
        assert_eq!(Value::from(0.25).to_string(), "0.25");
        assert_eq!(Value::from("ab").to_string(), "ab");
        assert_eq!(Value::from(BigInt::from(54)).to_string(), "54");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn display_containers_as_json() {
        let v = map(&[
            ("b", Value::from(2)),
            ("a", Value::Array(vec![Value::from("x"), Value::Null])),
        ]);
        assert_eq!(v.to_string(), r#"{"a":["x",null],"b":2}"#);
    }

    #[test]
    fn json_conversion() {
        let json: Json = serde_json::json!({"asset": "base", "amount": 500, "ok": true});
        let v = Value::from_json(&json);
        assert_eq!(
            v,
            map(&[
                ("amount", Value::from(500)),
                ("asset", Value::from("base")),
                ("ok", Value::Bool(true)),
            ])
        );
        assert_eq!(v.to_json(), json);
    }

    #[test]
    fn json_length_of_payload() {
        let v = map(&[("app", Value::from("data"))]);
        assert_eq!(v.json_len(), r#"{"app":"data"}"#.len());
    }

    #[test]
    fn bigint_serializes_as_string_in_json() {
        let v = Value::from(BigInt::from(42));
        assert_eq!(v.to_json(), Json::String("42".into()));
    }

    #[test]
    fn clone_is_deep() {
        let original = Value::Array(vec![map(&[("k", Value::from(1))])]);
        let mut copy = original.clone();
        if let Value::Array(items) = &mut copy {
            items.push(Value::Null);
        }
        assert_ne!(original, copy);
        assert_eq!(original, Value::Array(vec![map(&[("k", Value::from(1))])]));
    }
}
