use crate::core::data_type::DataType;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, hash::Hash};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Boolean(bool),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Null,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Value '{raw}' is not a valid {data_type}")]
pub struct ValueParseError {
    pub raw: String,
    pub data_type: DataType,
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        use Value::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Int(v) => v.hash(state),
            Uint(v) => v.hash(state),
            // Hash the bits of the float to handle NaN and -0.0 consistently
            Float(v) => v.to_bits().hash(state),
            String(v) => v.hash(state),
            Boolean(v) => v.hash(state),
            Bytes(v) => v.hash(state),
            Date(v) => v.hash(state),
            Timestamp(v) => v.hash(state),
            Null => {}
        }
    }
}

impl Value {
    /// Parses the textual form of a value of the given type.
    ///
    /// This is the inverse of [`Value::to_token`] and is used to turn stored
    /// offsets and configured initial offsets back into typed values.
    pub fn parse(data_type: DataType, raw: &str) -> Result<Value, ValueParseError> {
        let err = || ValueParseError {
            raw: raw.to_string(),
            data_type,
        };

        let value = match data_type {
            DataType::Int => Value::Int(raw.trim().parse().map_err(|_| err())?),
            DataType::Uint => Value::Uint(raw.trim().parse().map_err(|_| err())?),
            DataType::Float => Value::Float(raw.trim().parse().map_err(|_| err())?),
            DataType::Boolean => Value::Boolean(raw.trim().parse().map_err(|_| err())?),
            DataType::String => Value::String(raw.to_string()),
            DataType::Bytes => Value::Bytes(raw.as_bytes().to_vec()),
            DataType::Date => Value::Date(
                NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| err())?,
            ),
            DataType::Timestamp => Value::Timestamp(
                DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|_| err())?
                    .with_timezone(&Utc),
            ),
        };

        Ok(value)
    }

    /// Textual form used inside offset tokens. `None` for values that cannot
    /// be used as a resume position.
    pub fn to_token(&self) -> Option<String> {
        match self {
            Value::Int(v) => Some(v.to_string()),
            Value::Uint(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::String(v) => Some(v.clone()),
            Value::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            Value::Timestamp(v) => Some(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Boolean(_) | Value::Bytes(_) | Value::Null => None,
        }
    }

    /// Ordering used for offset comparisons. Values of different kinds, and
    /// NULL, are incomparable, mirroring SQL semantics.
    pub fn offset_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Uint(a), Value::Uint(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Uint(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Value::Uint(a), Value::Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            Value::String(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Bytes(_) => None,
            Value::Boolean(v) => Some(v.to_string()),
            Value::Null => Some("NULL".to_string()),
            other => other.to_token(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            other => f.write_str(&other.as_string().unwrap_or_default()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
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
