use crate::{
    delegate::PipelineDelegate,
    error::RuntimeError,
    pipeline::{Pipeline, StageDefinition},
    tracker::OffsetTracker,
};
use engine_core::{
    context::{StageContext, StageInfo},
    error::StageError,
    event_bus::EventBus,
    metrics::{Metrics, MetricsSnapshot},
    offsets::OffsetStore,
    policy::{ErrorSink, EventSink},
    stage::{StageKind, StageRuntime},
};
use model::{
    events::EventRecord,
    execution::error_record::ErrorRecord,
    offsets::{OffsetMap, SINGLE_STREAM_KEY},
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between polls of a source that returned nothing new.
const POLL_IDLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RunReport {
    pub pipeline: String,
    pub metrics: MetricsSnapshot,
    pub errors: Vec<ErrorRecord>,
    pub events: Vec<EventRecord>,
    pub offsets: OffsetMap,
    pub elapsed: Duration,
}

pub async fn run(
    pipeline: Pipeline,
    store: Arc<dyn OffsetStore>,
    bus: EventBus,
    cancel: CancellationToken,
) -> Result<RunReport, RuntimeError> {
    PipelineRunner::new(pipeline, store, bus, cancel)
        .execute()
        .await
}

struct PipelineRunner {
    name: String,
    max_batch_size: usize,
    origin: StageRuntime,
    downstream: Arc<Vec<StageRuntime>>,
    tracker: Arc<OffsetTracker>,
    bus: EventBus,
    stop: CancellationToken,
    metrics: Metrics,
    errors: ErrorSink,
    events: EventSink,
}

impl PipelineRunner {
    fn new(
        pipeline: Pipeline,
        store: Arc<dyn OffsetStore>,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        let Pipeline {
            settings,
            origin,
            downstream,
        } = pipeline;

        // stopping one run never cancels the caller's token
        let stop = cancel.child_token();
        let metrics = Metrics::new();
        let errors = ErrorSink::new(settings.error_sink_capacity);
        let events = EventSink::new(settings.event_sink_capacity);

        let runtime = |def: StageDefinition| {
            let info = StageInfo {
                id: def.id,
                kind: def.stage.kind(),
                on_record_error: def.on_record_error,
            };
            let ctx = StageContext::new(
                info,
                errors.clone(),
                events.clone(),
                stop.clone(),
                settings.preview,
                metrics.clone(),
            );
            StageRuntime::new(def.stage, Arc::new(ctx))
        };

        let origin = runtime(origin);
        let downstream = Arc::new(downstream.into_iter().map(runtime).collect());

        PipelineRunner {
            name: settings.name.clone(),
            max_batch_size: settings.max_batch_size,
            origin,
            downstream,
            tracker: Arc::new(OffsetTracker::new(store, !settings.preview)),
            bus,
            stop,
            metrics,
            errors,
            events,
        }
    }

    async fn execute(self) -> Result<RunReport, RuntimeError> {
        let started = Instant::now();
        info!(pipeline = %self.name, stages = self.downstream.len() + 1, "Starting pipeline");

        let result = self.run_stages().await;
        self.destroy().await;

        match result {
            Ok(()) => {
                let report = self.report(started).await;
                info!(
                    pipeline = %self.name,
                    records = report.metrics.records_processed,
                    batches = report.metrics.batches_processed,
                    error_records = report.errors.len(),
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Pipeline finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(pipeline = %self.name, error = %e, "Pipeline failed");
                Err(e)
            }
        }
    }

    async fn run_stages(&self) -> Result<(), RuntimeError> {
        self.init_stages().await?;
        let offsets = self.tracker.load().await?;

        let delegate = Arc::new(PipelineDelegate::new(
            self.origin.id().clone(),
            self.downstream.clone(),
            self.tracker.clone(),
            self.bus.clone(),
            self.stop.clone(),
        ));
        let origin = &self.origin;
        origin
            .context()
            .set_delegate(delegate)
            .map_err(|e| RuntimeError::stage(origin.id().as_str(), e))?;

        let produced = match origin.kind() {
            StageKind::PushSource => {
                info!(
                    stage = %origin.id(),
                    threads = origin.number_of_threads(),
                    "Running push source"
                );
                origin.produce_push(offsets, self.max_batch_size).await
            }
            StageKind::Source => self.poll(offsets).await,
            other => Err(StageError::IllegalState(format!(
                "stage kind {other} cannot start a pipeline"
            ))),
        };

        produced.map_err(|e| RuntimeError::stage(origin.id().as_str(), e))
    }

    /// Every stage is initialized, so that all issues are reported at once.
    async fn init_stages(&self) -> Result<(), RuntimeError> {
        let mut issues = Vec::new();

        for stage in std::iter::once(&self.origin).chain(self.downstream.iter()) {
            match stage.init().await {
                Ok(()) => {}
                Err(StageError::Invalid(found)) => issues.extend(found),
                Err(e) => return Err(RuntimeError::stage(stage.id().as_str(), e)),
            }
        }

        if issues.is_empty() {
            return Ok(());
        }
        for issue in &issues {
            warn!(pipeline = %self.name, issue = %issue, "Configuration issue");
        }
        Err(RuntimeError::Invalid {
            pipeline: self.name.clone(),
            issues,
        })
    }

    /// Drives a polled origin under the single-stream key until it is
    /// exhausted or the pipeline stops.
    async fn poll(&self, mut offsets: OffsetMap) -> Result<(), StageError> {
        let ctx = self.origin.context();
        let mut last = offsets.remove(SINGLE_STREAM_KEY);

        while !ctx.is_stopped() {
            let (batch, next) = self
                .origin
                .produce_poll(last.as_deref(), self.max_batch_size)
                .await?;

            if batch.is_empty() && next.is_some() && next == last {
                tokio::select! {
                    _ = self.stop.cancelled() => {}
                    _ = tokio::time::sleep(POLL_IDLE) => {}
                }
                continue;
            }

            let handoff = ctx
                .process_batch(batch, Some(SINGLE_STREAM_KEY), next.as_deref())
                .await?;
            if !handoff.is_processed() {
                break;
            }

            let Some(token) = next else {
                info!(stage = %self.origin.id(), "Source exhausted");
                break;
            };
            ctx.commit_offset(SINGLE_STREAM_KEY, Some(&token)).await?;
            last = Some(token);

            if !handoff.keep_going() {
                break;
            }
        }
        Ok(())
    }

    async fn destroy(&self) {
        self.origin.destroy().await;
        for stage in self.downstream.iter() {
            stage.destroy().await;
        }
        debug!(pipeline = %self.name, "Stages destroyed");
    }

    async fn report(&self, started: Instant) -> RunReport {
        RunReport {
            pipeline: self.name.clone(),
            metrics: self.metrics.snapshot(),
            errors: self.errors.snapshot(),
            events: self.events.snapshot(),
            offsets: self.tracker.snapshot().await,
            elapsed: started.elapsed(),
        }
    }
}
