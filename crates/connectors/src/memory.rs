use crate::{
    catalog::{ColumnMeta, PartitionCatalog, PartitionDescriptor},
    error::ConnectorError,
    query::{OffsetQuery, compare_keys},
    reader::{PartitionReader, RowStream},
    row::{RawCell, RawRow},
};
use async_trait::async_trait;
use futures::StreamExt;
use model::core::{data_type::DataType, value::Value};
use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    },
    time::Duration,
};

/// One in-memory partition: column metadata plus textual rows.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Option<String>>>,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryTable {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, data_type: DataType, is_primary_key: bool) -> Self {
        let ordinal = self.columns.len();
        self.columns.push(ColumnMeta {
            name: name.to_string(),
            data_type,
            is_nullable: !is_primary_key,
            is_primary_key,
            ordinal,
        });
        self
    }

    pub fn row(mut self, cells: &[&str]) -> Self {
        self.rows
            .push(cells.iter().map(|c| Some(c.to_string())).collect());
        self
    }

    /// `id INT` key column with `value STRING`, ids `0..count`.
    pub fn sequential(name: impl Into<String>, count: i64) -> Self {
        let name = name.into();
        let mut table = MemoryTable::new(name.clone())
            .column("id", DataType::Int, true)
            .column("value", DataType::String, false);
        for id in 0..count {
            table = table.row(&[&id.to_string(), &format!("{name}-{id}")]);
        }
        table
    }
}

#[derive(Default)]
struct State {
    tables: Vec<MemoryTable>,
    failing_opens: HashMap<String, usize>,
    opens: Vec<String>,
    active: HashMap<String, usize>,
}

/// In-process source used by tests and local runs: a catalog and a reader over
/// tables held in memory, with hooks for injecting read failures.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
    max_concurrent_reads: Arc<AtomicUsize>,
    open_delay: Option<Duration>,
}

impl MemoryDatabase {
    pub fn new(tables: Vec<MemoryTable>) -> Self {
        let db = MemoryDatabase::default();
        db.lock().tables = tables;
        db
    }

    /// Delays every open, widening the window in which reads overlap.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn append_row(&self, partition: &str, cells: &[&str]) {
        let mut state = self.lock();
        if let Some(table) = state.tables.iter_mut().find(|t| t.name == partition) {
            table
                .rows
                .push(cells.iter().map(|c| Some(c.to_string())).collect());
        }
    }

    /// Makes the next `times` opens of `partition` fail.
    pub fn fail_opens(&self, partition: &str, times: usize) {
        self.lock()
            .failing_opens
            .insert(partition.to_string(), times);
    }

    /// Partitions in the order reads were opened.
    pub fn opens(&self) -> Vec<String> {
        self.lock().opens.clone()
    }

    /// Highest number of simultaneously open reads seen on a single partition.
    pub fn max_concurrent_reads(&self) -> usize {
        self.max_concurrent_reads.load(AtomicOrdering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PartitionCatalog for MemoryDatabase {
    async fn discover(&self) -> Result<Vec<PartitionDescriptor>, ConnectorError> {
        Ok(self
            .lock()
            .tables
            .iter()
            .map(|t| PartitionDescriptor {
                name: t.name.clone(),
                columns: t.columns.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl PartitionReader for MemoryDatabase {
    async fn open(&self, query: &OffsetQuery) -> Result<RowStream, ConnectorError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        let rows = {
            let mut state = self.lock();
            state.opens.push(query.partition.clone());

            if let Some(remaining) = state.failing_opens.get_mut(&query.partition)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(ConnectorError::Read {
                    partition: query.partition.clone(),
                    message: "injected failure".to_string(),
                });
            }

            let table = state
                .tables
                .iter()
                .find(|t| t.name == query.partition)
                .ok_or_else(|| ConnectorError::PartitionNotFound(query.partition.clone()))?;

            let rows = select(table, query)?;
            let active = state.active.entry(query.partition.clone()).or_insert(0);
            *active += 1;
            self.max_concurrent_reads
                .fetch_max(*active, AtomicOrdering::SeqCst);
            rows
        };

        let guard = ActiveRead {
            state: self.state.clone(),
            partition: query.partition.clone(),
        };

        Ok(futures::stream::iter(rows)
            .map(move |row| {
                let _open = &guard;
                Ok(row)
            })
            .boxed())
    }
}

struct ActiveRead {
    state: Arc<Mutex<State>>,
    partition: String,
}

impl Drop for ActiveRead {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = state.active.get_mut(&self.partition) {
            *active = active.saturating_sub(1);
        }
    }
}

fn select(table: &MemoryTable, query: &OffsetQuery) -> Result<Vec<RawRow>, ConnectorError> {
    let mut keyed = Vec::with_capacity(table.rows.len());

    for (idx, cells) in table.rows.iter().enumerate() {
        let row = RawRow {
            source_id: format!("{}::{}", table.name, idx),
            cells: table
                .columns
                .iter()
                .map(|col| RawCell {
                    name: col.name.clone(),
                    data_type: col.data_type,
                    is_nullable: col.is_nullable,
                    raw: cells.get(col.ordinal).cloned().flatten(),
                })
                .collect(),
        };

        let key = offset_key(&row, query)?;
        if query.admits(&key) {
            keyed.push((key, row));
        }
    }

    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b).unwrap_or(Ordering::Equal));

    let limit = query.limit.unwrap_or(usize::MAX);
    Ok(keyed.into_iter().take(limit).map(|(_, row)| row).collect())
}

fn offset_key(row: &RawRow, query: &OffsetQuery) -> Result<Vec<Value>, ConnectorError> {
    query
        .columns
        .iter()
        .map(|col| {
            let raw = row
                .cell(&col.name)
                .and_then(|c| c.raw.as_deref())
                .ok_or_else(|| ConnectorError::InvalidMetadata(format!(
                    "partition '{}' has no value for offset column '{}'",
                    query.partition, col.name
                )))?;
            Value::parse(col.data_type, raw).map_err(|e| ConnectorError::Read {
                partition: query.partition.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}
