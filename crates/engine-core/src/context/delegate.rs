use crate::error::StageError;
use async_trait::async_trait;
use model::records::batch::Batch;

/// What became of a batch handed to the delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// Every downstream stage ran. `keep_going` turns false once the
    /// pipeline is stopping.
    Processed { keep_going: bool },
    /// The pipeline was already stopping and nothing ran. The batch's offset
    /// must not be committed.
    Rejected,
}

impl Handoff {
    pub fn is_processed(self) -> bool {
        matches!(self, Handoff::Processed { .. })
    }

    pub fn keep_going(self) -> bool {
        matches!(self, Handoff::Processed { keep_going: true })
    }
}

/// Receives the batches and commits of a push source. Injected once per
/// stage instance by whoever runs the pipeline.
#[async_trait]
pub trait PushSourceDelegate: Send + Sync {
    /// Runs the batch through the downstream stages.
    async fn process_batch(&self, batch: Batch) -> Result<Handoff, StageError>;

    /// Records the resume position of `entity`. `None` removes the entity.
    async fn commit_offset(&self, entity: &str, offset: Option<&str>) -> Result<(), StageError>;
}
