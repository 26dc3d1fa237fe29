use crate::{
    error::RuntimeError,
    pipeline::{Pipeline, StageDefinition},
    runner::{RunReport, run},
};
use async_trait::async_trait;
use connectors::{mapper::TypedRecordMapper, memory::MemoryDatabase};
use engine_config::settings::PipelineSettings;
use engine_core::{
    context::StageContext,
    error::{ErrorCode, StageError},
    event_bus::EventBus,
    offsets::OffsetStore,
    stage::{Stage, Target},
};
use engine_processing::source::TableSource;
use model::{events::NoMoreData, execution::policy::OnRecordError, records::batch::Batch};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

pub const RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// Keeps every batch it is given. Optionally fails on the batch of
/// `partition` that contains `id`.
#[derive(Clone, Default)]
pub struct RecordingTarget {
    written: Arc<Mutex<Vec<Batch>>>,
    fail_on: Option<(String, i64)>,
}

impl RecordingTarget {
    pub fn failing_on(partition: &str, id: i64) -> Self {
        RecordingTarget {
            written: Arc::default(),
            fail_on: Some((partition.to_string(), id)),
        }
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.written.lock().unwrap().clone()
    }

    pub fn ids(&self, partition: &str) -> Vec<i64> {
        self.batches()
            .iter()
            .filter(|b| b.entity.as_deref() == Some(partition))
            .flat_map(|b| {
                b.records()
                    .iter()
                    .filter_map(|r| r.get_value("id").as_i64())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Entities of the data batches, in hand-off order.
    pub fn entities(&self) -> Vec<String> {
        self.batches()
            .iter()
            .filter(|b| !b.records().is_empty())
            .filter_map(|b| b.entity.clone())
            .collect()
    }

    fn should_fail(&self, batch: &Batch) -> bool {
        self.fail_on.as_ref().is_some_and(|(partition, id)| {
            batch.entity.as_deref() == Some(partition.as_str())
                && batch
                    .records()
                    .iter()
                    .any(|r| r.get_value("id").as_i64() == Some(*id))
        })
    }
}

#[async_trait]
impl Target for RecordingTarget {
    async fn write(&self, ctx: &StageContext, batch: &Batch) -> Result<(), StageError> {
        self.written.lock().unwrap().push(batch.clone());
        if self.should_fail(batch) {
            let err = StageError::new(ErrorCode::TargetWrite, vec!["recording".to_string()]);
            return ctx.errors().on_batch_error(batch, err);
        }
        Ok(())
    }
}

pub fn settings(threads: usize, batch_size: usize) -> PipelineSettings {
    let mut settings = PipelineSettings {
        name: "test".to_string(),
        max_batch_size: batch_size,
        ..PipelineSettings::default()
    };
    settings.source.threads = threads;
    settings.source.pool_size = threads + 2;
    settings.source.queue_timeout_ms = 20;
    settings.source.max_batch_size = batch_size;
    settings
}

pub fn table_pipeline(
    db: &MemoryDatabase,
    settings: PipelineSettings,
    target: &RecordingTarget,
    target_policy: OnRecordError,
) -> Pipeline {
    let source = TableSource::new(
        settings.source.clone(),
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        Arc::new(TypedRecordMapper),
    );
    let source_policy = settings.source.on_record_error;

    Pipeline::new(
        settings,
        StageDefinition::new("table", Stage::PushSource(Box::new(source)), source_policy),
    )
    .unwrap()
    .with_stage(StageDefinition::new(
        "recording",
        Stage::Target(Box::new(target.clone())),
        Some(target_policy),
    ))
    .unwrap()
}

/// Runs the pipeline and stops it at the first no-more-data event.
pub async fn run_until_drained(
    pipeline: Pipeline,
    store: Arc<dyn OffsetStore>,
) -> Result<RunReport, RuntimeError> {
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    let (_subscription, mut drained) = bus.listen::<NoMoreData>(8).await;

    let stopper = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if drained.recv().await.is_some() {
                cancel.cancel();
            }
        })
    };

    let result = tokio::time::timeout(RUN_TIMEOUT, run(pipeline, store, bus, cancel))
        .await
        .expect("pipeline did not stop in time");
    stopper.abort();
    result
}
