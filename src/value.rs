//! Raw column values from InfluxQL query results.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use ordered_float::OrderedFloat;
use serde::de::{self, Deserialize, Deserializer, Visitor};

/// One column value of a result row, exactly as the server sent it.
///
/// Timestamps arrive as RFC3339 strings (or epoch integers when the query
/// asks for an `epoch` precision) and are kept that way; use
/// [`Value::as_time`] from a row parser to interpret them.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// JSON `null`.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed 64-bit integer.
    Integer(i64),

    /// Unsigned integer too large for `i64`.
    UnsignedInteger(u64),

    /// 64-bit floating point value.
    Float(OrderedFloat<f64>),

    /// String value, including unparsed timestamps.
    String(String),
}

impl Value {
    /// Returns the value as a string reference if it is a `String` variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an owned string if it is a `String` variant.
    pub fn string(&self) -> Option<String> {
        self.as_str().map(str::to_string)
    }

    /// Returns the value as f64. Integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(f.into_inner()),
            Value::Integer(i) => Some(*i as f64),
            Value::UnsignedInteger(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// Returns the value as i64 if it is an integer that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::UnsignedInteger(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Returns the value as u64 if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(i) => u64::try_from(*i).ok(),
            Value::UnsignedInteger(u) => Some(*u),
            _ => None,
        }
    }

    /// Returns the value as a bool if it is a `Bool` variant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Parses a `String` value as an RFC3339 timestamp.
    pub fn as_time(&self) -> Option<DateTime<FixedOffset>> {
        self.as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(OrderedFloat(v))
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

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::UnsignedInteger(u) => write!(f, "{}", u),
            Value::Float(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar column value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::UnsignedInteger(v),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(OrderedFloat(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
