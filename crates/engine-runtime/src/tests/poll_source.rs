use crate::{
    pipeline::{Pipeline, StageDefinition},
    runner::run,
    tests::support::{RUN_TIMEOUT, RecordingTarget, settings},
};
use async_trait::async_trait;
use engine_core::{
    context::{BatchContext, StageContext},
    error::StageError,
    event_bus::EventBus,
    offsets::{FileOffsetStore, OffsetStore},
    stage::{Source, Stage},
};
use model::{
    core::value::Value, execution::policy::OnRecordError, offsets::SINGLE_STREAM_KEY,
    records::record::Record,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

/// Emits ids `0..limit`, one per poll, then reports exhaustion.
struct Counter {
    limit: i64,
    delay: Option<Duration>,
}

#[async_trait]
impl Source for Counter {
    async fn produce(
        &self,
        _ctx: &StageContext,
        last_offset: Option<&str>,
        _max_batch_size: usize,
        batch: &mut BatchContext,
    ) -> Result<Option<String>, StageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = last_offset
            .and_then(|o| o.parse::<i64>().ok())
            .map_or(0, |n| n + 1);
        if next >= self.limit {
            return Ok(None);
        }
        batch.add_record(Record::new(format!("counter::{next}")).with_field("id", Value::Int(next)));
        Ok(Some(next.to_string()))
    }
}

fn pipeline(target: &RecordingTarget) -> Pipeline {
    counter_pipeline(target, None)
}

fn counter_pipeline(target: &RecordingTarget, delay: Option<Duration>) -> Pipeline {
    Pipeline::new(
        settings(1, 10),
        StageDefinition::new(
            "counter",
            Stage::Source(Box::new(Counter { limit: 3, delay })),
            Some(OnRecordError::StopPipeline),
        ),
    )
    .unwrap()
    .with_stage(StageDefinition::new(
        "recording",
        Stage::Target(Box::new(target.clone())),
        Some(OnRecordError::StopPipeline),
    ))
    .unwrap()
}

// Scenario: a polled source with three records, run twice against the same store.
// Expected Outcome:
// - the first run stops on exhaustion with the single-stream offset at the last id.
// - the second run resumes after it and reads nothing.
#[traced_test]
#[tokio::test]
async fn polls_until_exhausted_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileOffsetStore::new(dir.path().join("offsets.json")));

    let first = RecordingTarget::default();
    let report = tokio::time::timeout(
        RUN_TIMEOUT,
        run(pipeline(&first), store.clone(), EventBus::new(), CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.metrics.records_processed, 3);
    assert_eq!(
        report.offsets.get(SINGLE_STREAM_KEY).map(String::as_str),
        Some("2")
    );

    let second = RecordingTarget::default();
    let report = tokio::time::timeout(
        RUN_TIMEOUT,
        run(pipeline(&second), store.clone(), EventBus::new(), CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.metrics.records_processed, 0);
    let stored = store.load().await.unwrap().unwrap();
    assert_eq!(stored.get(SINGLE_STREAM_KEY).map(String::as_str), Some("2"));
    assert!(logs_contain("Source exhausted"));
}

// Scenario: the run is cancelled while the first poll is still producing.
// Expected Outcome: the polled batch is never delivered, so no offset is stored for it.
#[traced_test]
#[tokio::test]
async fn cancelled_poll_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileOffsetStore::new(dir.path().join("offsets.json")));
    let target = RecordingTarget::default();
    let cancel = CancellationToken::new();

    let running = tokio::spawn(run(
        counter_pipeline(&target, Some(Duration::from_millis(300))),
        store.clone(),
        EventBus::new(),
        cancel.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let report = tokio::time::timeout(RUN_TIMEOUT, running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(target.batches().is_empty());
    assert_eq!(report.metrics.records_processed, 0);
    assert!(report.offsets.is_empty());
    assert!(store.load().await.unwrap().is_none());
}
