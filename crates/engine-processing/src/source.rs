use crate::{
    error::{connection_unavailable, offset_failed},
    partitions::resolve_partitions,
    provider::PartitionProvider,
    worker::{PartitionWorker, ReadResources, SharedOffsets, WorkerConfig},
};
use async_trait::async_trait;
use connectors::{
    catalog::PartitionCatalog, mapper::RecordMapper, pool::ConnectionPool,
    reader::PartitionReader,
};
use dashmap::DashMap;
use engine_config::settings::{
    TableSourceSettings,
    validator::{GROUP_TABLE, validate_table_source},
};
use engine_core::{
    context::StageContext,
    error::{ErrorCode, StageError},
    stage::PushSource,
};
use futures::{FutureExt, future::join_all};
use model::{
    core::identifiers::WorkerId,
    events::EventRecord,
    execution::issue::ConfigIssue,
    offsets::{OffsetMap, SINGLE_STREAM_KEY, TABLE_OFFSET_VERSION, TABLE_OFFSET_VERSION_KEY},
    partition::{context::PartitionContext, offset::PartitionOffset},
};
use std::{
    any::Any,
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

struct Prepared {
    partitions: Vec<Arc<PartitionContext>>,
    threads: usize,
}

/// Multithreaded origin reading many table partitions through a bounded
/// worker pool, one resumable offset per partition.
pub struct TableSource {
    settings: TableSourceSettings,
    catalog: Arc<dyn PartitionCatalog>,
    resources: ReadResources,
    prepared: OnceLock<Prepared>,
}

impl TableSource {
    pub fn new(
        settings: TableSourceSettings,
        catalog: Arc<dyn PartitionCatalog>,
        reader: Arc<dyn PartitionReader>,
        mapper: Arc<dyn RecordMapper>,
    ) -> Self {
        let pool = ConnectionPool::new(
            settings.pool_size,
            Duration::from_millis(settings.pool_timeout_ms),
        );

        TableSource {
            settings,
            catalog,
            resources: ReadResources {
                reader,
                mapper,
                pool,
            },
            prepared: OnceLock::new(),
        }
    }

    /// Partitions in rotation order, available after a successful `init`.
    pub fn partitions(&self) -> Vec<String> {
        self.prepared
            .get()
            .map(|p| p.partitions.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default()
    }

    fn prepared(&self) -> Result<&Prepared, StageError> {
        self.prepared
            .get()
            .ok_or_else(|| StageError::IllegalState("table source is not initialized".into()))
    }

    /// Moves legacy offsets to per-partition keys, seeds the shared offset map
    /// and checks every stored offset against its partition's columns.
    async fn handle_last_offsets(
        &self,
        ctx: &StageContext,
        partitions: &[Arc<PartitionContext>],
        mut last_offsets: OffsetMap,
        offsets: &SharedOffsets,
    ) -> Result<(), StageError> {
        if let Some(legacy) = last_offsets.remove(SINGLE_STREAM_KEY) {
            let exploded: BTreeMap<String, String> =
                serde_json::from_str(&legacy).map_err(|e| {
                    StageError::caused_by(
                        ErrorCode::InvalidOffset,
                        vec![SINGLE_STREAM_KEY.to_string()],
                        e,
                    )
                })?;

            info!(entities = exploded.len(), "Upgrading legacy table offsets");
            for (entity, token) in exploded {
                ctx.commit_offset(&entity, Some(&token)).await?;
                offsets.insert(entity, token);
            }
            ctx.commit_offset(SINGLE_STREAM_KEY, None).await?;
            ctx.commit_offset(TABLE_OFFSET_VERSION_KEY, Some(TABLE_OFFSET_VERSION))
                .await?;
        } else {
            for (entity, token) in last_offsets {
                offsets.insert(entity, token);
            }
        }

        for partition in partitions {
            let name = partition.name();
            let Some(stored) = offsets.get(name).map(|e| e.value().clone()) else {
                continue;
            };
            PartitionOffset::parse(name, &stored, partition.offset_columns())
                .map_err(|e| offset_failed(name, e))?;
            debug!(partition = %name, offset = %stored, "Resuming partition");
        }

        Ok(())
    }

    /// Waits for the first worker failure, the stop token or the end of all
    /// workers, emitting a no-more-data event whenever the provider signals one.
    async fn supervise(
        &self,
        ctx: &StageContext,
        provider: &PartitionProvider,
        failures: &mut mpsc::Receiver<StageError>,
    ) -> Result<(), StageError> {
        loop {
            tokio::select! {
                biased;

                failure = failures.recv() => {
                    return match failure {
                        Some(err) => {
                            error!(
                                stage = %ctx.stage_id(),
                                error = %err,
                                "Worker failed, stopping source"
                            );
                            Err(err)
                        }
                        None => Ok(()),
                    };
                }
                _ = ctx.stop_token().cancelled() => {
                    info!(stage = %ctx.stage_id(), "Stop requested");
                    return Ok(());
                }
                signal = provider.no_more_data() => {
                    info!(
                        stage = %ctx.stage_id(),
                        cycle = signal.cycle,
                        records = signal.record_count,
                        "All partitions drained"
                    );
                    let mut batch = ctx.start_batch();
                    batch.add_event(EventRecord::no_more_data(
                        ctx.stage_id().as_str(),
                        signal.record_count,
                    ));
                    if !ctx.process_batch(batch, None, None).await?.keep_going() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PushSource for TableSource {
    async fn init(&self, _ctx: &StageContext) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        validate_table_source(&self.settings, &mut issues);
        if !issues.is_empty() {
            return issues;
        }

        let discovered = match self.resources.pool.acquire().await {
            Ok(_conn) => self.catalog.discover().await,
            Err(e) => Err(e),
        };
        let discovered = match discovered {
            Ok(d) => d,
            Err(e) => {
                issues.push(ConfigIssue::new(
                    GROUP_TABLE,
                    "TABLE_13",
                    format!("cannot discover partitions: {e}"),
                ));
                return issues;
            }
        };

        let partitions = resolve_partitions(discovered, &self.settings, &mut issues);
        if !issues.is_empty() {
            return issues;
        }

        let threads = self.settings.threads.min(partitions.len()).max(1);
        info!(
            partitions = partitions.len(),
            threads,
            "Table source initialized"
        );
        if self.prepared.set(Prepared { partitions, threads }).is_err() {
            warn!("Table source initialized twice; keeping the first partition set");
        }
        issues
    }

    fn number_of_threads(&self) -> usize {
        self.prepared.get().map_or(1, |p| p.threads)
    }

    async fn produce(
        &self,
        ctx: Arc<StageContext>,
        last_offsets: OffsetMap,
        max_batch_size: usize,
    ) -> Result<(), StageError> {
        let prepared = self.prepared()?;
        let offsets: SharedOffsets = Arc::new(DashMap::new());
        self.handle_last_offsets(&ctx, &prepared.partitions, last_offsets, &offsets)
            .await?;

        let _supervisor_conn = self
            .resources
            .pool
            .acquire()
            .await
            .map_err(|e| connection_unavailable(ctx.stage_id().as_str(), e))?;

        let (provider, queues) = PartitionProvider::new(
            prepared.partitions.clone(),
            prepared.threads,
            self.settings.batch_strategy,
        );
        let config = WorkerConfig {
            strategy: self.settings.batch_strategy,
            chunk_size: max_batch_size.min(self.settings.max_batch_size).max(1),
            batches_per_assignment: self.settings.batches_per_assignment,
            queue_timeout: Duration::from_millis(self.settings.queue_timeout_ms),
        };

        let stop = ctx.stop_token().child_token();
        let (failures_tx, mut failures) = mpsc::channel::<StageError>(1);

        let handles: Vec<_> = queues
            .into_iter()
            .enumerate()
            .map(|(idx, queue)| {
                let worker = PartitionWorker::new(
                    WorkerId(idx),
                    ctx.clone(),
                    stop.clone(),
                    provider.clone(),
                    queue,
                    self.resources.clone(),
                    offsets.clone(),
                    config.clone(),
                );
                let failures = failures_tx.clone();

                tokio::spawn(async move {
                    let err = match AssertUnwindSafe(worker.run()).catch_unwind().await {
                        Ok(Ok(())) => return,
                        Ok(Err(err)) => err,
                        Err(panic) => StageError::new(
                            ErrorCode::WorkerFailed,
                            vec![idx.to_string(), panic_message(panic.as_ref())],
                        ),
                    };
                    if let Err(e) = failures.try_send(err) {
                        warn!(
                            worker = idx,
                            error = %e,
                            "Dropped failure of a worker; another failure is pending"
                        );
                    }
                })
            })
            .collect();
        drop(failures_tx);

        let mut result = self.supervise(&ctx, &provider, &mut failures).await;

        stop.cancel();
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task did not complete");
            }
        }
        if result.is_ok()
            && let Ok(err) = failures.try_recv()
        {
            result = Err(err);
        }

        info!(stage = %ctx.stage_id(), ok = result.is_ok(), "Table source finished");
        result
    }

    async fn destroy(&self) {
        self.resources.pool.close();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::{
        mapper::TypedRecordMapper,
        memory::{MemoryDatabase, MemoryTable},
    };
    use engine_core::{
        context::{Handoff, PushSourceDelegate, StageInfo},
        metrics::Metrics,
        policy::{ErrorSink, EventSink},
        stage::StageKind,
    };
    use model::{
        core::identifiers::StageId,
        execution::policy::OnRecordError,
        records::batch::Batch,
    };
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Records every hand-off and stops the run at the first no-more-data event.
    struct Recording {
        stop: CancellationToken,
        batches: Mutex<Vec<Batch>>,
        commits: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl PushSourceDelegate for Recording {
        async fn process_batch(&self, batch: Batch) -> Result<Handoff, StageError> {
            if batch.events().iter().any(|e| e.is_no_more_data()) {
                self.stop.cancel();
            }
            self.batches.lock().unwrap().push(batch);
            Ok(Handoff::Processed { keep_going: true })
        }

        async fn commit_offset(&self, entity: &str, offset: Option<&str>) -> Result<(), StageError> {
            self.commits
                .lock()
                .unwrap()
                .push((entity.to_string(), offset.map(str::to_string)));
            Ok(())
        }
    }

    impl Recording {
        fn ids(&self, partition: &str) -> Vec<i64> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .filter(|b| b.entity.as_deref() == Some(partition))
                .flat_map(|b| b.records().iter().filter_map(|r| r.get_value("id").as_i64()))
                .collect()
        }

        fn last_commit(&self, entity: &str) -> Option<Option<String>> {
            self.commits
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(e, _)| e == entity)
                .map(|(_, o)| o.clone())
        }
    }

    fn settings(threads: usize) -> TableSourceSettings {
        TableSourceSettings {
            threads,
            pool_size: threads + 2,
            queue_timeout_ms: 50,
            ..TableSourceSettings::default()
        }
    }

    fn source(db: &MemoryDatabase, settings: TableSourceSettings) -> TableSource {
        TableSource::new(
            settings,
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            Arc::new(TypedRecordMapper),
        )
    }

    fn context(policy: OnRecordError) -> (Arc<StageContext>, Arc<Recording>) {
        let stop = CancellationToken::new();
        let ctx = StageContext::new(
            StageInfo {
                id: StageId::new("table"),
                kind: StageKind::PushSource,
                on_record_error: Some(policy),
            },
            ErrorSink::new(10),
            EventSink::new(10),
            stop.clone(),
            false,
            Metrics::new(),
        );
        let delegate = Arc::new(Recording {
            stop,
            batches: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
        });
        ctx.set_delegate(delegate.clone()).unwrap();
        (Arc::new(ctx), delegate)
    }

    fn two_tables() -> MemoryDatabase {
        MemoryDatabase::new(vec![
            MemoryTable::sequential("A", 5),
            MemoryTable::sequential("B", 3),
        ])
    }

    #[tokio::test]
    async fn init_reports_missing_partitions() {
        let db = MemoryDatabase::new(Vec::new());
        let (ctx, _) = context(OnRecordError::ToError);
        let issues = source(&db, settings(1)).init(&ctx).await;
        assert_eq!(issues[0].code, "TABLE_07");
    }

    #[tokio::test]
    async fn init_caps_threads_at_partition_count() {
        let db = two_tables();
        let (ctx, _) = context(OnRecordError::ToError);
        let table = source(&db, settings(4));
        assert!(table.init(&ctx).await.is_empty());
        assert_eq!(table.number_of_threads(), 2);
        assert_eq!(table.partitions(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn reads_every_partition_once_in_order() {
        let db = two_tables();
        let (ctx, delegate) = context(OnRecordError::ToError);
        let table = source(&db, settings(2));
        assert!(table.init(&ctx).await.is_empty());

        table.produce(ctx.clone(), OffsetMap::new(), 2).await.unwrap();

        assert_eq!(delegate.ids("A"), vec![0, 1, 2, 3, 4]);
        assert_eq!(delegate.ids("B"), vec![0, 1, 2]);
        assert_eq!(delegate.last_commit("A"), Some(Some("id=4".into())));
        assert_eq!(delegate.last_commit("B"), Some(Some("id=2".into())));
        assert_eq!(ctx.metrics().snapshot().no_more_data_events, 1);
        assert!(
            delegate
                .batches
                .lock()
                .unwrap()
                .iter()
                .filter(|b| b.entity.is_some())
                .all(|b| b.records().len() <= 2)
        );
    }

    #[tokio::test]
    async fn resumes_after_stored_offsets() {
        let db = two_tables();
        let (ctx, delegate) = context(OnRecordError::ToError);
        let table = source(&db, settings(2));
        assert!(table.init(&ctx).await.is_empty());

        let offsets = OffsetMap::from([("A".to_string(), "3".to_string())]);
        table.produce(ctx, offsets, 10).await.unwrap();

        assert_eq!(delegate.ids("A"), vec![4]);
        assert_eq!(delegate.ids("B"), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn explodes_legacy_offsets() {
        let db = two_tables();
        let (ctx, delegate) = context(OnRecordError::ToError);
        let table = source(&db, settings(1));
        assert!(table.init(&ctx).await.is_empty());

        let offsets = OffsetMap::from([(
            SINGLE_STREAM_KEY.to_string(),
            r#"{"A":"id=2","B":"id=2"}"#.to_string(),
        )]);
        table.produce(ctx, offsets, 10).await.unwrap();

        assert_eq!(delegate.ids("A"), vec![3, 4]);
        assert!(delegate.ids("B").is_empty());
        assert_eq!(delegate.last_commit(SINGLE_STREAM_KEY), Some(None));
        assert_eq!(
            delegate.last_commit(TABLE_OFFSET_VERSION_KEY),
            Some(Some(TABLE_OFFSET_VERSION.to_string()))
        );
    }

    #[tokio::test]
    async fn changed_offset_columns_are_fatal() {
        let db = two_tables();
        let (ctx, delegate) = context(OnRecordError::ToError);
        let table = source(&db, settings(2));
        assert!(table.init(&ctx).await.is_empty());

        let offsets = OffsetMap::from([("A".to_string(), "value=A-1::id=1".to_string())]);
        let err = table.produce(ctx, offsets, 10).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::OffsetColumnMismatch);
        assert!(delegate.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_failure_stops_pipeline_under_stop_policy() {
        let db = two_tables();
        db.fail_opens("A", 1);
        let (ctx, _) = context(OnRecordError::StopPipeline);
        let table = source(&db, settings(2));
        assert!(table.init(&ctx).await.is_empty());

        let err = table.produce(ctx, OffsetMap::new(), 10).await.unwrap_err();
        assert!(matches!(err, StageError::PipelineStopped { .. }));
        assert_eq!(err.code(), ErrorCode::ReadFailed);
    }

    #[tokio::test]
    async fn read_failure_is_retried_next_cycle() {
        let db = two_tables();
        db.fail_opens("A", 1);
        let (ctx, delegate) = context(OnRecordError::ToError);
        let table = source(&db, settings(2));
        assert!(table.init(&ctx).await.is_empty());

        table.produce(ctx.clone(), OffsetMap::new(), 10).await.unwrap();

        assert_eq!(delegate.ids("A"), vec![0, 1, 2, 3, 4]);
        let errors = ctx.errors().sink().snapshot();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error.code, "READ_01");
    }

    #[tokio::test]
    async fn drain_finishes_a_partition_before_the_next() {
        let db = two_tables();
        let (ctx, delegate) = context(OnRecordError::ToError);
        let table = source(
            &db,
            TableSourceSettings {
                batch_strategy: engine_config::settings::BatchStrategy::Drain,
                ..settings(1)
            },
        );
        assert!(table.init(&ctx).await.is_empty());

        table.produce(ctx, OffsetMap::new(), 2).await.unwrap();

        let entities: Vec<_> = delegate
            .batches
            .lock()
            .unwrap()
            .iter()
            .filter_map(|b| b.entity.clone())
            .collect();
        assert_eq!(entities, vec!["A", "A", "A", "B", "B"]);
        assert_eq!(&db.opens()[..2], ["A", "B"]);
    }
}
