use crate::{core::data_type::DataType, partition::offset::PartitionOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetColumn {
    pub name: String,
    pub data_type: DataType,
}

impl OffsetColumn {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        OffsetColumn {
            name: name.into(),
            data_type,
        }
    }
}

/// Identity of one data partition, resolved once at init and immutable for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionContext {
    name: String,
    offset_columns: Vec<OffsetColumn>,
    /// Position to start from when no offset has been stored for the partition.
    initial_offset: Option<PartitionOffset>,
}

impl PartitionContext {
    pub fn new(
        name: impl Into<String>,
        offset_columns: Vec<OffsetColumn>,
        initial_offset: Option<PartitionOffset>,
    ) -> Self {
        PartitionContext {
            name: name.into(),
            offset_columns,
            initial_offset,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset_columns(&self) -> &[OffsetColumn] {
        &self.offset_columns
    }

    pub fn offset_column_names(&self) -> Vec<&str> {
        self.offset_columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn initial_offset(&self) -> Option<&PartitionOffset> {
        self.initial_offset.as_ref()
    }
}

impl fmt::Display for PartitionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.offset_column_names().join(","))
    }
}
