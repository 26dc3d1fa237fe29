use crate::tracker::OffsetTracker;
use async_trait::async_trait;
use chrono::Utc;
use engine_core::{
    context::{Handoff, PushSourceDelegate},
    error::StageError,
    event_bus::EventBus,
    stage::StageRuntime,
};
use model::{
    core::identifiers::StageId,
    events::{BatchProcessed, NoMoreData, OffsetCommitted},
    records::batch::Batch,
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Carries an origin's batches through the downstream stages in order and
/// its commits into the offset tracker, publishing each step on the bus.
pub struct PipelineDelegate {
    origin: StageId,
    downstream: Arc<Vec<StageRuntime>>,
    tracker: Arc<OffsetTracker>,
    bus: EventBus,
    stop: CancellationToken,
    cycles: AtomicU64,
}

impl PipelineDelegate {
    pub fn new(
        origin: StageId,
        downstream: Arc<Vec<StageRuntime>>,
        tracker: Arc<OffsetTracker>,
        bus: EventBus,
        stop: CancellationToken,
    ) -> Self {
        PipelineDelegate {
            origin,
            downstream,
            tracker,
            bus,
            stop,
            cycles: AtomicU64::new(0),
        }
    }

    async fn publish_events(&self, batch: &Batch) {
        for event in batch.events().iter().filter(|e| e.is_no_more_data()) {
            let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
            let record_count = event
                .attributes
                .get("record-count")
                .and_then(|c| c.parse().ok())
                .unwrap_or_default();

            self.bus
                .publish(NoMoreData {
                    stage: event.source.clone(),
                    cycle,
                    record_count,
                    timestamp: event.ts,
                })
                .await;
        }
    }
}

#[async_trait]
impl PushSourceDelegate for PipelineDelegate {
    async fn process_batch(&self, batch: Batch) -> Result<Handoff, StageError> {
        if self.stop.is_cancelled() {
            debug!(batch_id = %batch.id, "Pipeline stopping, batch rejected");
            return Ok(Handoff::Rejected);
        }

        self.publish_events(&batch).await;

        let batch_id = batch.id.clone();
        let entity = batch.entity.clone();
        let row_count = batch.records().len() as u64;

        let mut current = batch;
        for stage in self.downstream.iter() {
            current = match stage.process(current).await {
                Ok(next) => next,
                Err(err) => {
                    warn!(stage = %stage.id(), error = %err, "Downstream stage failed");
                    self.stop.cancel();
                    return Err(err);
                }
            };
        }

        self.bus
            .publish(BatchProcessed {
                stage: self.origin.to_string(),
                batch_id,
                entity,
                row_count,
                timestamp: Utc::now(),
            })
            .await;

        Ok(Handoff::Processed {
            keep_going: !self.stop.is_cancelled(),
        })
    }

    async fn commit_offset(&self, entity: &str, offset: Option<&str>) -> Result<(), StageError> {
        self.tracker.commit(entity, offset).await?;

        self.bus
            .publish(OffsetCommitted {
                stage: self.origin.to_string(),
                entity: entity.to_string(),
                offset: offset.map(str::to_string),
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }
}
