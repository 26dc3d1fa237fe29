use crate::{
    context::{BatchContext, StageContext},
    error::StageError,
    stage::{Stage, StageKind},
};
use model::{core::identifiers::StageId, offsets::OffsetMap, records::batch::Batch};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Created,
    Initialized,
    Running,
    Destroyed,
}

/// Drives one stage through `Created -> Initialized -> Running -> Destroyed`
/// and dispatches execution by stage kind.
pub struct StageRuntime {
    stage: Stage,
    ctx: Arc<StageContext>,
    state: Mutex<StageState>,
}

impl StageRuntime {
    pub fn new(stage: Stage, ctx: Arc<StageContext>) -> Self {
        StageRuntime {
            stage,
            ctx,
            state: Mutex::new(StageState::Created),
        }
    }

    pub fn id(&self) -> &StageId {
        self.ctx.stage_id()
    }

    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }

    pub fn context(&self) -> &Arc<StageContext> {
        &self.ctx
    }

    pub fn state(&self) -> StageState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Issues leave the stage in `Created`.
    pub async fn init(&self) -> Result<(), StageError> {
        self.check(&[StageState::Created], "init")?;

        let issues = self.stage.init(&self.ctx).await;
        if !issues.is_empty() {
            warn!(stage = %self.id(), issues = issues.len(), "Stage reported configuration issues");
            return Err(StageError::Invalid(issues));
        }

        self.transition(&[StageState::Created], StageState::Initialized, "init")?;
        info!(stage = %self.id(), kind = %self.kind(), "Stage initialized");
        Ok(())
    }

    pub fn number_of_threads(&self) -> usize {
        match &self.stage {
            Stage::PushSource(s) => s.number_of_threads(),
            _ => 1,
        }
    }

    pub async fn produce_push(
        &self,
        last_offsets: OffsetMap,
        max_batch_size: usize,
    ) -> Result<(), StageError> {
        let Stage::PushSource(source) = &self.stage else {
            return Err(self.wrong_kind("produce_push"));
        };
        self.begin_run("produce_push")?;
        source
            .produce(self.ctx.clone(), last_offsets, max_batch_size)
            .await
    }

    pub async fn produce_poll(
        &self,
        last_offset: Option<&str>,
        max_batch_size: usize,
    ) -> Result<(BatchContext, Option<String>), StageError> {
        let Stage::Source(source) = &self.stage else {
            return Err(self.wrong_kind("produce_poll"));
        };
        self.begin_run("produce_poll")?;

        let mut batch = self.ctx.start_batch();
        let next = source
            .produce(&self.ctx, last_offset, max_batch_size, &mut batch)
            .await?;
        Ok((batch, next))
    }

    /// Runs a non-origin stage on a batch. Targets and executors pass the
    /// batch through unchanged.
    pub async fn process(&self, batch: Batch) -> Result<Batch, StageError> {
        self.begin_run("process")?;

        match &self.stage {
            Stage::Processor(p) => p.process(&self.ctx, batch).await,
            Stage::Target(t) => {
                t.write(&self.ctx, &batch).await?;
                Ok(batch)
            }
            Stage::Executor(e) => {
                e.execute(&self.ctx, &batch).await?;
                Ok(batch)
            }
            Stage::Source(_) | Stage::PushSource(_) => Err(self.wrong_kind("process")),
        }
    }

    /// Safe to call in any state, including after a failed `init`.
    pub async fn destroy(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == StageState::Destroyed {
                return;
            }
            *state = StageState::Destroyed;
        }

        self.stage.destroy().await;
        debug!(stage = %self.id(), "Stage destroyed");
    }

    fn begin_run(&self, op: &str) -> Result<(), StageError> {
        self.transition(
            &[StageState::Initialized, StageState::Running],
            StageState::Running,
            op,
        )
    }

    fn check(&self, allowed: &[StageState], op: &str) -> Result<(), StageError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(self.illegal(op, state))
        }
    }

    fn transition(&self, allowed: &[StageState], to: StageState, op: &str) -> Result<(), StageError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !allowed.contains(&*state) {
            return Err(self.illegal(op, *state));
        }
        *state = to;
        Ok(())
    }

    fn illegal(&self, op: &str, state: StageState) -> StageError {
        StageError::IllegalState(format!(
            "cannot {op} stage '{}' in state {state:?}",
            self.id()
        ))
    }

    fn wrong_kind(&self, op: &str) -> StageError {
        StageError::IllegalState(format!(
            "cannot {op} stage '{}' of kind {}",
            self.id(),
            self.kind()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::StageInfo,
        metrics::Metrics,
        policy::{ErrorSink, EventSink},
        stage::{Processor, Source},
    };
    use async_trait::async_trait;
    use model::{
        core::value::Value,
        execution::{issue::ConfigIssue, policy::OnRecordError},
        records::record::Record,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Upper {
        fail_init: bool,
        destroyed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Processor for Upper {
        async fn init(&self, _ctx: &StageContext) -> Vec<ConfigIssue> {
            if self.fail_init {
                vec![ConfigIssue::new("TEST", "TEST_01", "broken")]
            } else {
                Vec::new()
            }
        }

        async fn process(&self, _ctx: &StageContext, batch: Batch) -> Result<Batch, StageError> {
            let records = batch
                .records()
                .iter()
                .cloned()
                .map(|mut r| {
                    let upper = r.get_value("name").as_string().map(|s| s.to_uppercase());
                    if let Some(upper) = upper {
                        r.set("name", Value::from(upper));
                    }
                    r
                })
                .collect();
            Ok(batch.with_records(records))
        }

        async fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Counter;

    #[async_trait]
    impl Source for Counter {
        async fn produce(
            &self,
            _ctx: &StageContext,
            last_offset: Option<&str>,
            _max_batch_size: usize,
            batch: &mut BatchContext,
        ) -> Result<Option<String>, StageError> {
            let next = last_offset.and_then(|o| o.parse::<i64>().ok()).map_or(0, |n| n + 1);
            batch.add_record(Record::new(format!("counter::{next}")).with_field("n", Value::Int(next)));
            Ok(Some(next.to_string()))
        }
    }

    fn runtime(stage: Stage) -> StageRuntime {
        let ctx = StageContext::new(
            StageInfo {
                id: StageId::new("stage"),
                kind: stage.kind(),
                on_record_error: Some(OnRecordError::StopPipeline),
            },
            ErrorSink::new(10),
            EventSink::new(10),
            CancellationToken::new(),
            false,
            Metrics::new(),
        );
        StageRuntime::new(stage, Arc::new(ctx))
    }

    fn upper(fail_init: bool, destroyed: &Arc<AtomicUsize>) -> Stage {
        Stage::Processor(Box::new(Upper {
            fail_init,
            destroyed: destroyed.clone(),
        }))
    }

    #[tokio::test]
    async fn runs_through_lifecycle() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let rt = runtime(upper(false, &destroyed));
        assert_eq!(rt.state(), StageState::Created);

        rt.init().await.unwrap();
        assert_eq!(rt.state(), StageState::Initialized);

        let batch = Batch::new(
            None,
            None,
            vec![Record::new("r").with_field("name", Value::from("ada"))],
            Vec::new(),
        );
        let out = rt.process(batch).await.unwrap();
        assert_eq!(out.records()[0].get_value("name"), Value::from("ADA"));
        assert_eq!(rt.state(), StageState::Running);

        rt.destroy().await;
        rt.destroy().await;
        assert_eq!(rt.state(), StageState::Destroyed);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_illegal_transitions() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let rt = runtime(upper(false, &destroyed));
        let empty = || Batch::new(None, None, Vec::new(), Vec::new());

        assert!(matches!(rt.process(empty()).await, Err(StageError::IllegalState(_))));

        rt.init().await.unwrap();
        assert!(matches!(rt.init().await, Err(StageError::IllegalState(_))));

        rt.destroy().await;
        assert!(matches!(rt.process(empty()).await, Err(StageError::IllegalState(_))));
    }

    #[tokio::test]
    async fn init_issues_keep_stage_created() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let rt = runtime(upper(true, &destroyed));

        match rt.init().await {
            Err(StageError::Invalid(issues)) => assert_eq!(issues[0].code, "TEST_01"),
            other => panic!("expected issues, got {other:?}"),
        }
        assert_eq!(rt.state(), StageState::Created);

        rt.destroy().await;
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatches_by_kind() {
        let rt = runtime(Stage::Source(Box::new(Counter)));
        rt.init().await.unwrap();

        let (batch, next) = rt.produce_poll(Some("4"), 10).await.unwrap();
        assert_eq!(next.as_deref(), Some("5"));
        assert_eq!(batch.records()[0].get_value("n"), Value::Int(5));

        assert!(matches!(
            rt.produce_push(OffsetMap::new(), 10).await,
            Err(StageError::IllegalState(_))
        ));
        assert!(matches!(
            rt.process(Batch::new(None, None, Vec::new(), Vec::new())).await,
            Err(StageError::IllegalState(_))
        ));
    }
}
