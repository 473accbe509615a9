//! Cell values of relational rows.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// A flat row: column name to value, in schema order.
pub type Row = IndexMap<String, SqlValue>;

/// A single relational cell: string, number, boolean or null.
///
/// Numbers are `f64`; integral values serialize without a fraction so keys
/// read back as `0`, `1`, ... rather than `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum SqlValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SqlValue {
    /// Short type name used in validation messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "boolean",
            SqlValue::Number(_) => "number",
            SqlValue::Text(_) => "string",
        }
    }

    /// Returns the string slice for text values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number for numeric values.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a primary key: a non-negative integer no larger
    /// than [`MAX_KEY`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn as_key(&self) -> Option<u64> {
        match self {
            SqlValue::Number(n) if *n >= 0.0 && *n <= MAX_KEY as f64 && n.fract() == 0.0 => {
                Some(*n as u64)
            }
            _ => None,
        }
    }

    /// Builds a key value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn key(key: u64) -> Self {
        SqlValue::Number(key as f64)
    }
}

/// Largest primary key: beyond 2^53 a number no longer holds every integer.
pub const MAX_KEY: u64 = 1 << 53;

/// Renders a number the way scripts print it: integers without a fraction.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn render_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("null"),
            SqlValue::Bool(b) => write!(f, "{b}"),
            SqlValue::Number(n) => f.write_str(&render_number(*n)),
            SqlValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Returned when a JSON value is not a flat scalar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("relational cells must be string, number, boolean or null, got {0}")]
pub struct NotAScalar(pub &'static str);

impl TryFrom<Value> for SqlValue {
    type Error = NotAScalar;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Bool(b)),
            Value::Number(n) => n.as_f64().map(SqlValue::Number).ok_or(NotAScalar("number")),
            Value::String(s) => Ok(SqlValue::Text(s)),
            Value::Array(_) => Err(NotAScalar("array")),
            Value::Object(_) => Err(NotAScalar("object")),
        }
    }
}

impl From<SqlValue> for Value {
    #[allow(clippy::cast_possible_truncation)]
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(b),
            SqlValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                Value::Number(Number::from(n as i64))
            }
            SqlValue::Number(n) => Number::from_f64(n).map_or(Value::Null, Value::Number),
            SqlValue::Text(s) => Value::String(s),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<f64> for SqlValue {
    fn from(n: f64) -> Self {
        SqlValue::Number(n)
    }
}

impl From<i64> for SqlValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        SqlValue::Number(n as f64)
    }
}

impl From<i32> for SqlValue {
    fn from(n: i32) -> Self {
        SqlValue::Number(f64::from(n))
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

/// Convert a JSON object into a row, preserving key order.
///
/// # Errors
/// Returns [`NotAScalar`] if any field holds an array or object.
pub fn row_from_json(object: serde_json::Map<String, Value>) -> Result<Row, NotAScalar> {
    object
        .into_iter()
        .map(|(k, v)| SqlValue::try_from(v).map(|v| (k, v)))
        .collect()
}

/// Convert a row into a JSON object.
#[must_use]
pub fn row_to_json(row: Row) -> serde_json::Map<String, Value> {
    row.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
}
