use crate::error::ConnectorError;
use async_trait::async_trait;
use model::core::data_type::DataType;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: DataType,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub ordinal: usize,
}

/// What introspection knows about one partition (a table, a file, a shard).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionDescriptor {
    pub name: String,
    pub columns: Vec<ColumnMeta>,
}

impl PartitionDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Primary key columns in ordinal order; the default offset columns.
    pub fn key_columns(&self) -> Vec<&ColumnMeta> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }
}

/// Schema and partition introspection.
#[async_trait]
pub trait PartitionCatalog: Send + Sync {
    /// Lists partitions in the order the source reports them.
    async fn discover(&self) -> Result<Vec<PartitionDescriptor>, ConnectorError>;
}
