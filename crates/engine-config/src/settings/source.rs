use model::execution::policy::OnRecordError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a worker spends an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    /// Read a bounded number of chunks, then hand the partition back.
    #[default]
    Rotate,
    /// Stay on a partition until it has no more rows.
    Drain,
}

/// Global order in which partitions enter rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionOrdering {
    /// As reported by discovery.
    #[default]
    None,
    Alphabetical,
}

/// Settings of the multithreaded table source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSourceSettings {
    pub threads: usize,
    pub batch_strategy: BatchStrategy,
    pub ordering: PartitionOrdering,
    /// Maximum records per emitted batch.
    pub max_batch_size: usize,
    /// Chunks read from one open read before rotating (Rotate only).
    pub batches_per_assignment: usize,
    pub pool_size: usize,
    pub pool_timeout_ms: u64,
    /// How long an idle worker waits on its queue before re-checking for stop.
    pub queue_timeout_ms: u64,
    /// Partitions to read; empty reads every discovered partition.
    pub partitions: Vec<String>,
    /// Offset columns used for every partition instead of its key columns.
    pub offset_columns: Vec<String>,
    /// Starting value per offset column for partitions without a stored offset.
    pub initial_offsets: BTreeMap<String, String>,
    pub on_record_error: Option<OnRecordError>,
}

impl Default for TableSourceSettings {
    fn default() -> Self {
        TableSourceSettings {
            threads: 1,
            batch_strategy: BatchStrategy::Rotate,
            ordering: PartitionOrdering::None,
            max_batch_size: 1000,
            batches_per_assignment: 1,
            pool_size: 2,
            pool_timeout_ms: 30_000,
            queue_timeout_ms: 1_000,
            partitions: Vec::new(),
            offset_columns: Vec::new(),
            initial_offsets: BTreeMap::new(),
            on_record_error: Some(OnRecordError::ToError),
        }
    }
}
