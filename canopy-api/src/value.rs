//! # Typed Values
//!
//! The argument model carried by calls. The runtime never interprets
//! arguments beyond the error record convention below; arity and meaning
//! belong to the target control.
//!
//! ## Error records
//! Error replies carry a single `Value::Record` tagged [`ERROR_RECORD`] with
//! a `kind` and a `message` field, so a synthesized timeout looks exactly
//! like an error reported by a remote peer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ValueError;

/// Type name of the structured error record.
pub const ERROR_RECORD: &str = "error";

/// A typed call argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The empty value
    Empty,
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Ordered array of values
    Array(Vec<Value>),
    /// Key-ordered map
    Map(BTreeMap<String, Value>),
    /// Map-like structured record tagged with a type name
    Record {
        type_name: String,
        fields: BTreeMap<String, Value>,
    },
}

impl Value {
    /// Builds the structured error record used by error replies.
    pub fn error_record(kind: &str, message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("kind".to_string(), Value::Text(kind.to_string()));
        fields.insert("message".to_string(), Value::Text(message.into()));
        Value::Record {
            type_name: ERROR_RECORD.to_string(),
            fields,
        }
    }

    /// The `kind` field if this is an error record.
    pub fn error_kind(&self) -> Option<&str> {
        self.error_field("kind")
    }

    /// The `message` field if this is an error record.
    pub fn error_message(&self) -> Option<&str> {
        self.error_field("message")
    }

    fn error_field(&self, name: &str) -> Option<&str> {
        match self {
            Value::Record { type_name, fields } if type_name == ERROR_RECORD => {
                fields.get(name).and_then(Value::as_text)
            }
            _ => None,
        }
    }

    /// Name of the value's type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Record { .. } => "record",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Like [`Value::as_text`] but reports the mismatch.
    pub fn expect_text(&self) -> Result<&str, ValueError> {
        self.as_text().ok_or(ValueError::UnexpectedType {
            expected: "text",
            found: self.type_name(),
        })
    }

    /// Fetches argument `index` from an argument list.
    pub fn arg(args: &[Value], index: usize) -> Result<&Value, ValueError> {
        args.get(index).ok_or(ValueError::MissingArgument(index))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Number(value) => write!(f, "{value}"),
            Value::Text(text) => f.write_str(text),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(fields) => write_fields(f, "", fields),
            Value::Record { type_name, fields } => write_fields(f, type_name, fields),
        }
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, tag: &str, fields: &BTreeMap<String, Value>) -> fmt::Result {
    write!(f, "{tag}{{")?;
    for (index, (key, value)) in fields.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{key}: {value}")?;
    }
    f.write_str("}")
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_record_fields() {
        let error = Value::error_record("timeout", "no reply within 10s");
        assert_eq!(error.error_kind(), Some("timeout"));
        assert_eq!(error.error_message(), Some("no reply within 10s"));
        assert_eq!(Value::from("timeout").error_kind(), None);
    }

    #[test]
    fn test_expect_text_reports_type() {
        let err = Value::Int(3).expect_text().unwrap_err();
        assert_eq!(
            err,
            ValueError::UnexpectedType {
                expected: "text",
                found: "int"
            }
        );
    }

    #[test]
    fn test_display_nested() {
        let value = Value::Array(vec![Value::Int(1), Value::from("a")]);
        assert_eq!(value.to_string(), "[1, a]");
    }
}
