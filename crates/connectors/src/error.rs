use crate::file::csv::error::FileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The partition does not exist (any more) in the source.
    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    /// Opening or running a read against a partition failed.
    #[error("Read failed for partition '{partition}': {message}")]
    Read { partition: String, message: String },

    /// Failed to obtain a connection from the pool in time.
    #[error("Timed out after {waited_ms}ms waiting for one of {size} pooled connections")]
    PoolTimeout { size: usize, waited_ms: u128 },

    #[error("Connection pool closed")]
    PoolClosed,

    /// File-related error.
    #[error("File error: {0}")]
    File(#[from] FileError),

    /// Invalid metadata error.
    #[error("Invalid Metadata: {0}")]
    InvalidMetadata(String),
}
