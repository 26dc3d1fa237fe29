use crate::{
    context::{BatchContext, Handoff, PushSourceDelegate},
    error::StageError,
    metrics::Metrics,
    policy::{ErrorRecordHandler, ErrorSink, EventSink},
    stage::StageKind,
};
use model::{
    core::identifiers::StageId,
    events::EventRecord,
    execution::policy::OnRecordError,
    records::batch::Batch,
};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StageInfo {
    pub id: StageId,
    pub kind: StageKind,
    pub on_record_error: Option<OnRecordError>,
}

/// What a running stage sees of its pipeline: error routing, the event sink,
/// the stop token and, for push sources, the batch delegate.
///
/// Shared by every task of the stage; batch construction stays per task.
pub struct StageContext {
    info: StageInfo,
    errors: ErrorRecordHandler,
    events: EventSink,
    stop: CancellationToken,
    preview: bool,
    metrics: Metrics,
    delegate: OnceLock<Arc<dyn PushSourceDelegate>>,
}

impl StageContext {
    pub fn new(
        info: StageInfo,
        errors: ErrorSink,
        events: EventSink,
        stop: CancellationToken,
        preview: bool,
        metrics: Metrics,
    ) -> Self {
        let handler = ErrorRecordHandler::new(
            info.id.clone(),
            info.on_record_error,
            errors,
            metrics.clone(),
        );

        StageContext {
            info,
            errors: handler,
            events,
            stop,
            preview,
            metrics,
            delegate: OnceLock::new(),
        }
    }

    pub fn info(&self) -> &StageInfo {
        &self.info
    }

    pub fn stage_id(&self) -> &StageId {
        &self.info.id
    }

    pub fn is_preview(&self) -> bool {
        self.preview
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn errors(&self) -> &ErrorRecordHandler {
        &self.errors
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn set_delegate(&self, delegate: Arc<dyn PushSourceDelegate>) -> Result<(), StageError> {
        self.delegate.set(delegate).map_err(|_| {
            StageError::IllegalState(format!("stage '{}' already has a delegate", self.info.id))
        })
    }

    pub fn start_batch(&self) -> BatchContext {
        BatchContext::new()
    }

    pub fn to_event(&self, event: EventRecord) {
        if event.is_no_more_data() {
            self.metrics.increment_no_more_data();
        }
        self.events.push(event);
    }

    /// Hands the batch downstream. The offset of `entity` may be committed
    /// only after this returns `Handoff::Processed`.
    pub async fn process_batch(
        &self,
        batch: BatchContext,
        entity: Option<&str>,
        offset: Option<&str>,
    ) -> Result<Handoff, StageError> {
        let delegate = self.delegate()?;
        let (records, events) = batch.into_parts();
        for event in &events {
            self.to_event(event.clone());
        }

        let batch = Batch::new(
            entity.map(str::to_string),
            offset.map(str::to_string),
            records,
            events,
        );
        let rows = batch.records().len() as u64;
        debug!(stage = %self.info.id, batch_id = %batch.id, rows, "Processing batch");

        let handoff = delegate.process_batch(batch).await?;
        if handoff.is_processed() {
            self.metrics.increment_batches(1);
            self.metrics.increment_records(rows);
        }
        Ok(handoff)
    }

    pub async fn commit_offset(&self, entity: &str, offset: Option<&str>) -> Result<(), StageError> {
        self.delegate()?.commit_offset(entity, offset).await?;
        self.metrics.increment_commits(1);
        Ok(())
    }

    fn delegate(&self) -> Result<&Arc<dyn PushSourceDelegate>, StageError> {
        self.delegate.get().ok_or_else(|| {
            StageError::IllegalState(format!("stage '{}' has no delegate", self.info.id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use model::{core::value::Value, records::record::Record};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        batches: Mutex<Vec<Batch>>,
        commits: Mutex<Vec<(String, Option<String>)>>,
        reject: bool,
    }

    #[async_trait]
    impl PushSourceDelegate for Recording {
        async fn process_batch(&self, batch: Batch) -> Result<Handoff, StageError> {
            if self.reject {
                return Ok(Handoff::Rejected);
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

    fn context() -> StageContext {
        StageContext::new(
            StageInfo {
                id: StageId::new("table-source"),
                kind: StageKind::PushSource,
                on_record_error: Some(OnRecordError::ToError),
            },
            ErrorSink::new(10),
            EventSink::new(10),
            CancellationToken::new(),
            false,
            Metrics::new(),
        )
    }

    #[tokio::test]
    async fn requires_a_delegate() {
        let ctx = context();
        assert!(matches!(
            ctx.process_batch(ctx.start_batch(), None, None).await,
            Err(StageError::IllegalState(_))
        ));
        assert!(matches!(
            ctx.commit_offset("A", Some("id=1")).await,
            Err(StageError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn delegate_is_set_once() {
        let ctx = context();
        ctx.set_delegate(Arc::new(Recording::default())).unwrap();
        assert!(ctx.set_delegate(Arc::new(Recording::default())).is_err());
    }

    #[tokio::test]
    async fn forwards_batches_and_commits() {
        let ctx = context();
        let delegate = Arc::new(Recording::default());
        ctx.set_delegate(delegate.clone()).unwrap();

        let mut batch = ctx.start_batch();
        batch.add_record(Record::new("A::0").with_field("id", Value::Int(0)));
        batch.add_event(EventRecord::no_more_data("table-source", 1));

        let handoff = ctx.process_batch(batch, Some("A"), Some("id=0")).await.unwrap();
        assert_eq!(handoff, Handoff::Processed { keep_going: true });
        ctx.commit_offset("A", Some("id=0")).await.unwrap();

        let batches = delegate.batches.lock().unwrap();
        assert_eq!(batches[0].entity.as_deref(), Some("A"));
        assert_eq!(batches[0].records().len(), 1);
        assert_eq!(
            delegate.commits.lock().unwrap().as_slice(),
            &[("A".to_string(), Some("id=0".to_string()))]
        );
        assert_eq!(ctx.events().len(), 1);

        let snap = ctx.metrics().snapshot();
        assert_eq!(snap.records_processed, 1);
        assert_eq!(snap.offsets_committed, 1);
        assert_eq!(snap.no_more_data_events, 1);
    }

    #[tokio::test]
    async fn rejected_batches_are_not_counted() {
        let ctx = context();
        ctx.set_delegate(Arc::new(Recording {
            reject: true,
            ..Recording::default()
        }))
        .unwrap();

        let mut batch = ctx.start_batch();
        batch.add_record(Record::new("A::0").with_field("id", Value::Int(0)));

        let handoff = ctx.process_batch(batch, Some("A"), Some("id=0")).await.unwrap();
        assert_eq!(handoff, Handoff::Rejected);
        assert!(!handoff.keep_going());

        let snap = ctx.metrics().snapshot();
        assert_eq!(snap.records_processed, 0);
        assert_eq!(snap.batches_processed, 0);
    }
}
