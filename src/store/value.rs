//! Variable values
//!
//! A value is either an integer, text, or raw bytes. The JSON form is shared by
//! variable files and module `locals`: `12`, `"text"`, `{"hex": "0a0b"}`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A variable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ValueRepr", into = "ValueRepr")]
pub enum Value {
    /// Signed integer
    Int(i64),
    /// UTF-8 text
    Text(String),
    /// Arbitrary bytes
    Bytes(Vec<u8>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ValueRepr {
    Int(i64),
    Text(String),
    Bytes { hex: String },
}

impl TryFrom<ValueRepr> for Value {
    type Error = String;

    fn try_from(repr: ValueRepr) -> Result<Self, Self::Error> {
        match repr {
            ValueRepr::Int(i) => Ok(Value::Int(i)),
            ValueRepr::Text(s) => Ok(Value::Text(s)),
            ValueRepr::Bytes { hex } => hex::decode(&hex)
                .map(Value::Bytes)
                .map_err(|e| format!("invalid hex value '{}': {}", hex, e)),
        }
    }
}

impl From<Value> for ValueRepr {
    fn from(value: Value) -> Self {
        match value {
            Value::Int(i) => ValueRepr::Int(i),
            Value::Text(s) => ValueRepr::Text(s),
            Value::Bytes(b) => ValueRepr::Bytes { hex: hex::encode(b) },
        }
    }
}

impl Value {
    /// Build a value from raw bytes, preferring text when the bytes are valid UTF-8
    pub fn from_bytes_lossless(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    }

    /// Integer view of the value, if it has one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Text(s) => crate::common::parse_int(s.trim()).ok(),
            Value::Bytes(_) => None,
        }
    }

    /// Raw byte view of the value
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Int(i) => i.to_string().into_bytes(),
            Value::Text(s) => s.as_bytes().to_vec(),
            Value::Bytes(b) => b.clone(),
        }
    }

    /// Short type name for listings
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }
}

/// Text used when a value is substituted into a command line: integers in
/// decimal, text verbatim, bytes as lowercase hex
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&hex::encode(b)),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
