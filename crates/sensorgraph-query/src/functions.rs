//! Supported filter functions.
//!
//! Two families: boolean string tests usable directly as conditions, and
//! single-argument transforms that appear on one side of a comparison
//! (`year(resultTime) eq 2020`).

use chrono::{Datelike, Timelike};
use sensorgraph_schema::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolFunction {
    Contains,
    StartsWith,
    EndsWith,
}

impl BoolFunction {
    pub fn name(self) -> &'static str {
        match self {
            BoolFunction::Contains => "contains",
            BoolFunction::StartsWith => "startswith",
            BoolFunction::EndsWith => "endswith",
        }
    }

    /// `None` when either side is null or not text.
    pub fn apply(self, haystack: &Value, needle: &Value) -> Option<bool> {
        let haystack = haystack.as_text()?;
        let needle = needle.as_text()?;
        Some(match self {
            BoolFunction::Contains => haystack.contains(needle),
            BoolFunction::StartsWith => haystack.starts_with(needle),
            BoolFunction::EndsWith => haystack.ends_with(needle),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    ToLower,
    ToUpper,
    Trim,
    Length,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Round,
    Floor,
    Ceiling,
}

impl Transform {
    pub fn name(self) -> &'static str {
        match self {
            Transform::ToLower => "tolower",
            Transform::ToUpper => "toupper",
            Transform::Trim => "trim",
            Transform::Length => "length",
            Transform::Year => "year",
            Transform::Month => "month",
            Transform::Day => "day",
            Transform::Hour => "hour",
            Transform::Minute => "minute",
            Transform::Second => "second",
            Transform::Round => "round",
            Transform::Floor => "floor",
            Transform::Ceiling => "ceiling",
        }
    }

    pub fn input_kind(self) -> ValueKind {
        match self {
            Transform::ToLower | Transform::ToUpper | Transform::Trim | Transform::Length => {
                ValueKind::String
            }
            Transform::Year
            | Transform::Month
            | Transform::Day
            | Transform::Hour
            | Transform::Minute
            | Transform::Second => ValueKind::DateTime,
            Transform::Round | Transform::Floor | Transform::Ceiling => ValueKind::Number,
        }
    }

    pub fn output_kind(self) -> ValueKind {
        match self {
            Transform::ToLower | Transform::ToUpper | Transform::Trim => ValueKind::String,
            _ => ValueKind::Number,
        }
    }

    /// Apply to a stored value; anything of the wrong kind maps to null.
    pub fn apply(self, value: &Value) -> Value {
        match (self, value) {
            (Transform::ToLower, Value::Text(s)) => Value::Text(s.to_lowercase()),
            (Transform::ToUpper, Value::Text(s)) => Value::Text(s.to_uppercase()),
            (Transform::Trim, Value::Text(s)) => Value::Text(s.trim().to_string()),
            (Transform::Length, Value::Text(s)) => Value::Number(s.chars().count() as f64),
            (Transform::Year, Value::DateTime(dt)) => Value::Number(f64::from(dt.year())),
            (Transform::Month, Value::DateTime(dt)) => Value::Number(f64::from(dt.month())),
            (Transform::Day, Value::DateTime(dt)) => Value::Number(f64::from(dt.day())),
            (Transform::Hour, Value::DateTime(dt)) => Value::Number(f64::from(dt.hour())),
            (Transform::Minute, Value::DateTime(dt)) => Value::Number(f64::from(dt.minute())),
            (Transform::Second, Value::DateTime(dt)) => Value::Number(f64::from(dt.second())),
            (Transform::Round, Value::Number(n)) => Value::Number(n.round()),
            (Transform::Floor, Value::Number(n)) => Value::Number(n.floor()),
            (Transform::Ceiling, Value::Number(n)) => Value::Number(n.ceil()),
            _ => Value::Null,
        }
    }
}

/// Result of looking a function name up in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `swapped` is set for `substringof(needle, haystack)`, whose arguments
    /// are the reverse of `contains(haystack, needle)`.
    Bool { function: BoolFunction, swapped: bool },
    Transform(Transform),
}

impl Function {
    pub fn lookup(name: &str) -> Option<Function> {
        let function = match name.to_ascii_lowercase().as_str() {
            "substringof" => Function::Bool {
                function: BoolFunction::Contains,
                swapped: true,
            },
            "contains" => Function::Bool {
                function: BoolFunction::Contains,
                swapped: false,
            },
            "startswith" => Function::Bool {
                function: BoolFunction::StartsWith,
                swapped: false,
            },
            "endswith" => Function::Bool {
                function: BoolFunction::EndsWith,
                swapped: false,
            },
            "tolower" => Function::Transform(Transform::ToLower),
            "toupper" => Function::Transform(Transform::ToUpper),
            "trim" => Function::Transform(Transform::Trim),
            "length" => Function::Transform(Transform::Length),
            "year" => Function::Transform(Transform::Year),
            "month" => Function::Transform(Transform::Month),
            "day" => Function::Transform(Transform::Day),
            "hour" => Function::Transform(Transform::Hour),
            "minute" => Function::Transform(Transform::Minute),
            "second" => Function::Transform(Transform::Second),
            "round" => Function::Transform(Transform::Round),
            "floor" => Function::Transform(Transform::Floor),
            "ceiling" => Function::Transform(Transform::Ceiling),
            _ => return None,
        };
        Some(function)
    }

    pub fn arity(self) -> usize {
        match self {
            Function::Bool { .. } => 2,
            Function::Transform(_) => 1,
        }
    }
}

impl fmt::Display for BoolFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn substringof_is_contains_with_swapped_arguments() {
        assert_eq!(
            Function::lookup("substringof"),
            Some(Function::Bool {
                function: BoolFunction::Contains,
                swapped: true
            })
        );
        assert_eq!(Function::lookup("SubstringOf").map(Function::arity), Some(2));
        assert_eq!(Function::lookup("geo.distance"), None);
    }

    #[test]
    fn date_parts_extract_from_timestamps() {
        let dt = chrono::Utc.with_ymd_and_hms(2020, 6, 15, 13, 45, 30).unwrap();
        let v = Value::DateTime(dt);
        assert_eq!(Transform::Year.apply(&v), Value::Number(2020.0));
        assert_eq!(Transform::Minute.apply(&v), Value::Number(45.0));
        assert_eq!(Transform::Year.apply(&Value::text("2020")), Value::Null);
    }

    #[test]
    fn string_tests_are_null_on_missing_values() {
        assert_eq!(
            BoolFunction::StartsWith.apply(&Value::text("Thermo"), &Value::text("Th")),
            Some(true)
        );
        assert_eq!(BoolFunction::EndsWith.apply(&Value::Null, &Value::text("x")), None);
    }
}
