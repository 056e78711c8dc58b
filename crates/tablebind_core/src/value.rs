//! Column values and column types.
//!
//! # Responsibility
//! - Represent every value that crosses the mapping boundary.
//! - Bind values as positional statement parameters.
//!
//! # Invariants
//! - Booleans are stored as integers `0`/`1` and decoded back using the
//!   declared property type.

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Storage type of a mapped property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Integer,
    Text,
    Real,
    Boolean,
    Blob,
}

impl ValueType {
    /// Column type used in generated DDL.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::Blob => "BLOB",
        }
    }

    /// Value a non-nullable property holds when nothing else was given.
    pub fn zero_value(self) -> Value {
        match self {
            Self::Integer => Value::Integer(0),
            Self::Text => Value::Text(String::new()),
            Self::Real => Value::Real(0.0),
            Self::Boolean => Value::Bool(false),
            Self::Blob => Value::Blob(Vec::new()),
        }
    }

    /// Whether `<`, `<=`, `>`, `>=` are meaningful for this type.
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::Integer | Self::Text | Self::Real)
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(value) => Some(value.as_slice()),
            _ => None,
        }
    }

    /// Name of the runtime kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }

    /// Coerces `self` into `ty` where the conversion is lossless.
    ///
    /// Returns `None` when the value does not belong to the type. `Null`
    /// is passed through; nullability is checked by the caller.
    pub fn conform_to(self, ty: ValueType) -> Option<Value> {
        match (ty, self) {
            (_, Self::Null) => Some(Self::Null),
            (ValueType::Integer, value @ Self::Integer(_)) => Some(value),
            (ValueType::Text, value @ Self::Text(_)) => Some(value),
            (ValueType::Real, value @ Self::Real(_)) => Some(value),
            (ValueType::Real, Self::Integer(value)) => Some(Self::Real(value as f64)),
            (ValueType::Boolean, value @ Self::Bool(_)) => Some(value),
            (ValueType::Blob, value @ Self::Blob(_)) => Some(value),
            _ => None,
        }
    }

    /// Decodes a raw store value using the declared property type.
    pub(crate) fn decode(raw: Value, ty: ValueType) -> Option<Value> {
        match (ty, raw) {
            (_, Self::Null) => Some(Self::Null),
            (ValueType::Boolean, Self::Integer(0)) => Some(Self::Bool(false)),
            (ValueType::Boolean, Self::Integer(1)) => Some(Self::Bool(true)),
            (ValueType::Boolean, Self::Bool(value)) => Some(Self::Bool(value)),
            (ty, raw) => raw.conform_to(ty),
        }
    }

    /// Whether this is the zero value of its kind.
    pub(crate) fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(value) => !value,
            Self::Integer(value) => *value == 0,
            Self::Real(value) => *value == 0.0,
            Self::Text(value) => value.is_empty(),
            Self::Blob(value) => value.is_empty(),
        }
    }

    pub(crate) fn from_value_ref(raw: ValueRef<'_>) -> Result<Value, std::str::Utf8Error> {
        Ok(match raw {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(value) => Self::Integer(value),
            ValueRef::Real(value) => Self::Real(value),
            ValueRef::Text(bytes) => Self::Text(std::str::from_utf8(bytes)?.to_string()),
            ValueRef::Blob(bytes) => Self::Blob(bytes.to_vec()),
        })
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
            Self::Blob(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Bool(value) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*value)))
            }
            Self::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Borrowed(ValueRef::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Self::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value.as_slice())),
        })
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::{Value, ValueType};

    #[test]
    fn integer_widens_to_real_but_not_the_reverse() {
        assert_eq!(
            Value::Integer(3).conform_to(ValueType::Real),
            Some(Value::Real(3.0))
        );
        assert_eq!(Value::Real(3.0).conform_to(ValueType::Integer), None);
        assert_eq!(Value::from("x").conform_to(ValueType::Integer), None);
    }

    #[test]
    fn booleans_decode_from_stored_integers() {
        assert_eq!(
            Value::decode(Value::Integer(1), ValueType::Boolean),
            Some(Value::Bool(true))
        );
        assert_eq!(Value::decode(Value::Integer(7), ValueType::Boolean), None);
    }

    #[test]
    fn untagged_serde_picks_the_natural_variant() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 4, 2.5, "a"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Integer(4),
                Value::Real(2.5),
                Value::Text("a".into())
            ]
        );
    }
}
