use serde::{Deserialize, Serialize};
use std::fmt;

/// Column types as reported by partition introspection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int,
    Uint,
    Float,
    String,
    Boolean,
    Bytes,
    Date,
    Timestamp,
}

impl DataType {
    /// Whether a column of this type can order reads and carry an offset.
    ///
    /// Booleans and binary columns have no useful total order for resuming
    /// a scan, so they are rejected as offset columns.
    pub fn is_offset_capable(&self) -> bool {
        !matches!(self, DataType::Boolean | DataType::Bytes)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int => "INT",
            DataType::Uint => "UINT",
            DataType::Float => "FLOAT",
            DataType::String => "STRING",
            DataType::Boolean => "BOOLEAN",
            DataType::Bytes => "BYTES",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
