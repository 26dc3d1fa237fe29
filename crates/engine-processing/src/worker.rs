use crate::{
    error::{connection_unavailable, mapping_failed, offset_failed, read_failed},
    provider::{PartitionLease, PartitionProvider, ReadOutcome},
};
use connectors::{
    mapper::RecordMapper,
    pool::{ConnectionPool, PooledConnection},
    query::OffsetQuery,
    reader::{PartitionReader, RowStream},
    row::RawRow,
};
use dashmap::DashMap;
use engine_config::settings::BatchStrategy;
use engine_core::{
    context::{Handoff, StageContext},
    error::{ErrorCode, StageError},
};
use futures::StreamExt;
use model::{
    core::{identifiers::WorkerId, value::Value},
    partition::{context::PartitionContext, offset::PartitionOffset},
    records::record::Record,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Latest committed offset per entity, shared by all workers of a source.
/// Each partition key is written only by the worker holding its lease.
pub type SharedOffsets = Arc<DashMap<String, String>>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub strategy: BatchStrategy,
    pub chunk_size: usize,
    pub batches_per_assignment: usize,
    pub queue_timeout: Duration,
}

/// Everything a worker reads with, shared across workers.
#[derive(Clone)]
pub struct ReadResources {
    pub reader: Arc<dyn PartitionReader>,
    pub mapper: Arc<dyn RecordMapper>,
    pub pool: ConnectionPool,
}

/// An open read of one partition. Dropping it closes the read and returns
/// the connection.
struct ReadContext {
    rows: RowStream,
    _conn: PooledConnection,
}

struct Chunk {
    rows: Vec<RawRow>,
    drained: bool,
}

pub struct PartitionWorker {
    core: WorkerCore,
    stop: CancellationToken,
    provider: Arc<PartitionProvider>,
    queue: mpsc::Receiver<PartitionLease>,
    contexts: HashMap<String, ReadContext>,
}

/// The part of a worker borrowed across awaits. Open reads stay outside it:
/// they are `Send` but not `Sync`.
struct WorkerCore {
    id: WorkerId,
    ctx: Arc<StageContext>,
    resources: ReadResources,
    offsets: SharedOffsets,
    config: WorkerConfig,
}

impl PartitionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkerId,
        ctx: Arc<StageContext>,
        stop: CancellationToken,
        provider: Arc<PartitionProvider>,
        queue: mpsc::Receiver<PartitionLease>,
        resources: ReadResources,
        offsets: SharedOffsets,
        config: WorkerConfig,
    ) -> Self {
        PartitionWorker {
            core: WorkerCore {
                id,
                ctx,
                resources,
                offsets,
                config,
            },
            stop,
            provider,
            queue,
            contexts: HashMap::new(),
        }
    }

    /// Runs until stopped. An error is fatal to the whole source.
    pub async fn run(mut self) -> Result<(), StageError> {
        let id = self.core.id;
        info!(worker = %id, "Worker started");

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let lease = tokio::select! {
                _ = self.stop.cancelled() => break,
                next = timeout(self.core.config.queue_timeout, self.queue.recv()) => match next {
                    Err(_) => continue,
                    Ok(None) => break,
                    Ok(Some(lease)) => lease,
                },
            };

            debug!(
                worker = %id,
                partition = %lease.name(),
                cycle = lease.cycle(),
                "Acquired partition"
            );
            let result = self.work_on(lease.partition()).await;
            self.contexts.remove(lease.name());

            match result {
                Ok(outcome) => self.provider.release(lease, outcome),
                Err(err) => {
                    // no batch may follow a fatal error, from any worker
                    self.core.ctx.stop_token().cancel();
                    self.provider.release(lease, ReadOutcome::default());
                    return Err(err);
                }
            }
        }

        info!(worker = %id, "Worker stopped");
        Ok(())
    }

    async fn work_on(&mut self, partition: &PartitionContext) -> Result<ReadOutcome, StageError> {
        let max_chunks = match self.core.config.strategy {
            BatchStrategy::Rotate => self.core.config.batches_per_assignment.max(1),
            BatchStrategy::Drain => usize::MAX,
        };
        let mut outcome = ReadOutcome::default();

        for _ in 0..max_chunks {
            if self.stop.is_cancelled() {
                break;
            }

            let chunk = match self.read_chunk(partition).await {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.contexts.remove(partition.name());
                    if matches!(
                        err.code(),
                        ErrorCode::OffsetColumnMismatch | ErrorCode::InvalidOffset
                    ) {
                        return Err(err);
                    }
                    warn!(
                        worker = %self.core.id,
                        partition = %partition.name(),
                        error = %err,
                        "Read failed"
                    );
                    self.core.ctx.errors().on_error(err)?;
                    break;
                }
            };

            if !chunk.rows.is_empty() {
                let rows = chunk.rows.len() as u64;
                let handoff = self.core.emit(partition, chunk.rows).await?;
                if !handoff.is_processed() {
                    // the pipeline is stopping; the chunk is read again on resume
                    break;
                }
                outcome.rows += rows;
                if !handoff.keep_going() {
                    self.stop.cancel();
                    break;
                }
            }

            outcome.drained = chunk.drained;
            if outcome.drained {
                break;
            }
        }

        Ok(outcome)
    }

    async fn read_chunk(&mut self, partition: &PartitionContext) -> Result<Chunk, StageError> {
        let name = partition.name();
        if !self.contexts.contains_key(name) {
            let read = self.core.open(partition).await?;
            self.contexts.insert(name.to_string(), read);
        }

        let size = self.core.config.chunk_size.max(1);
        let Some(read) = self.contexts.get_mut(name) else {
            return Err(StageError::IllegalState(format!(
                "no open read for partition '{name}'"
            )));
        };

        let mut rows = Vec::with_capacity(size);
        while rows.len() < size {
            match read.rows.next().await {
                Some(Ok(row)) => rows.push(row),
                Some(Err(e)) => return Err(read_failed(name, e)),
                None => {
                    return Ok(Chunk {
                        rows,
                        drained: true,
                    });
                }
            }
        }

        Ok(Chunk {
            rows,
            drained: false,
        })
    }
}

impl WorkerCore {
    async fn open(&self, partition: &PartitionContext) -> Result<ReadContext, StageError> {
        let name = partition.name();
        let lower_bound = self.lower_bound(partition)?;

        let conn = self
            .resources
            .pool
            .acquire()
            .await
            .map_err(|e| connection_unavailable(name, e))?;

        let limit = match self.config.strategy {
            BatchStrategy::Rotate => Some(
                self.config.chunk_size.max(1) * self.config.batches_per_assignment.max(1),
            ),
            BatchStrategy::Drain => None,
        };
        let query = OffsetQuery::new(name, partition.offset_columns().to_vec())
            .after(lower_bound)
            .limit(limit);
        debug!(worker = %self.id, sql = %query.to_sql(), "Opening partition read");

        let rows = self
            .resources
            .reader
            .open(&query)
            .await
            .map_err(|e| read_failed(name, e))?;

        Ok(ReadContext { rows, _conn: conn })
    }

    /// Committed offset if there is one, else the configured initial offset.
    /// A stored offset is re-validated against the offset columns.
    fn lower_bound(&self, partition: &PartitionContext) -> Result<Option<Vec<Value>>, StageError> {
        let name = partition.name();
        let columns = partition.offset_columns();
        let stored = self.offsets.get(name).map(|entry| entry.value().clone());

        let offset = match stored {
            Some(raw) => {
                let parsed = PartitionOffset::parse(name, &raw, columns)
                    .map_err(|e| offset_failed(name, e))?;
                Some(parsed)
            }
            None => partition.initial_offset().cloned(),
        };

        offset
            .map(|o| o.values(columns))
            .transpose()
            .map_err(|e| offset_failed(name, e))
    }

    /// Maps rows and hands them off. Only a processed batch has the offset
    /// of its last row committed and published.
    async fn emit(
        &self,
        partition: &PartitionContext,
        rows: Vec<RawRow>,
    ) -> Result<Handoff, StageError> {
        let name = partition.name();
        let columns = partition.offset_columns();

        let Some(last) = rows.last() else {
            return Ok(Handoff::Processed { keep_going: true });
        };
        let offset = offset_of(last, columns).map_err(|e| offset_failed(name, e))?;
        let token = offset.encode();

        let mut batch = self.ctx.start_batch();
        for row in &rows {
            match self.resources.mapper.map(name, row) {
                Ok(record) => batch.add_record(record),
                Err(e) => {
                    let err = mapping_failed(name, &row.source_id, e);
                    self.ctx.errors().on_record_error(raw_record(name, row), err)?;
                }
            }
        }

        let mapped = batch.len();
        let handoff = self
            .ctx
            .process_batch(batch, Some(name), Some(&token))
            .await?;
        if !handoff.is_processed() {
            debug!(
                worker = %self.id,
                partition = %name,
                offset = %token,
                "Batch rejected, offset left uncommitted"
            );
            return Ok(handoff);
        }

        self.ctx.commit_offset(name, Some(&token)).await?;
        self.offsets.insert(name.to_string(), token.clone());

        info!(
            worker = %self.id,
            partition = %name,
            rows = rows.len(),
            records = mapped,
            offset = %token,
            "Processed batch."
        );
        Ok(handoff)
    }
}

fn offset_of(
    row: &RawRow,
    columns: &[model::partition::context::OffsetColumn],
) -> Result<PartitionOffset, model::partition::offset::OffsetError> {
    use model::partition::offset::OffsetError;

    let pairs = columns
        .iter()
        .map(|col| {
            let raw = row
                .cell(&col.name)
                .and_then(|c| c.raw.as_deref())
                .ok_or_else(|| OffsetError::MissingValue {
                    column: col.name.clone(),
                })?;
            let value = Value::parse(col.data_type, raw).map_err(|source| {
                OffsetError::InvalidValue {
                    column: col.name.clone(),
                    source,
                }
            })?;
            value
                .to_token()
                .map(|token| (col.name.clone(), token))
                .ok_or_else(|| OffsetError::MissingValue {
                    column: col.name.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PartitionOffset::new(pairs))
}

/// A row that failed mapping, kept as text for the error record.
fn raw_record(partition: &str, row: &RawRow) -> Record {
    let mut record = Record::new(row.source_id.as_str()).with_attribute("partition", partition);
    for cell in &row.cells {
        let value = cell
            .raw
            .as_deref()
            .map_or(Value::Null, Value::from);
        record.set(cell.name.as_str(), value);
    }
    record
}
