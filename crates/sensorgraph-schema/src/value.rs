//! Literal values and value kinds.
//!
//! Filters arrive with loosely typed literals (a number may be sent as a
//! string, a timestamp is always a string). `Value::coerce` lifts a literal
//! into the kind declared by the property it is compared against; the
//! compiler rejects the comparison when no coercion exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Number,
    DateTime,
    Boolean,
    Geometry,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::DateTime => "datetime",
            ValueKind::Boolean => "boolean",
            ValueKind::Geometry => "geometry",
        };
        f.write_str(name)
    }
}

/// A literal or stored attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    /// WKT text; geometries only support equality.
    Geometry(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn number(n: impl Into<f64>) -> Self {
        Value::Number(n.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Kind of a non-null value.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Boolean),
            Value::Number(_) => Some(ValueKind::Number),
            Value::Text(_) => Some(ValueKind::String),
            Value::DateTime(_) => Some(ValueKind::DateTime),
            Value::Geometry(_) => Some(ValueKind::Geometry),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Geometry(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Interpret a numeric value as a storage key.
    pub fn as_key(&self) -> Option<u32> {
        let n = self.as_number()?;
        if n.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&n) {
            Some(n as u32)
        } else {
            None
        }
    }

    /// Lift this value into `kind`. `Null` coerces to every kind.
    pub fn coerce(&self, kind: ValueKind) -> Option<Value> {
        match (self, kind) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Bool(_), ValueKind::Boolean)
            | (Value::Number(_), ValueKind::Number)
            | (Value::Text(_), ValueKind::String)
            | (Value::DateTime(_), ValueKind::DateTime)
            | (Value::Geometry(_), ValueKind::Geometry) => Some(self.clone()),
            (Value::Text(s), ValueKind::Number) => s.trim().parse::<f64>().ok().map(Value::Number),
            (Value::Text(s), ValueKind::Boolean) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (Value::Text(s), ValueKind::DateTime) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc))),
            (Value::Text(s), ValueKind::Geometry) => Some(Value::Geometry(s.clone())),
            (Value::Number(n), ValueKind::String) => Some(Value::Text(n.to_string())),
            _ => None,
        }
    }

    /// Total order between two values of the same kind.
    ///
    /// Returns `None` for nulls, mixed kinds, NaN, and unequal geometries
    /// (geometries are equality-only).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Geometry(a), Value::Geometry(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Geometry(wkt) => write!(f, "geometry'{wkt}'"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
