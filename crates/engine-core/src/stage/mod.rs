use crate::{
    context::{BatchContext, StageContext},
    error::StageError,
};
use async_trait::async_trait;
use model::{execution::issue::ConfigIssue, offsets::OffsetMap, records::batch::Batch};
use std::{fmt, sync::Arc};

pub mod runtime;

pub use runtime::{StageRuntime, StageState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    PushSource,
    Processor,
    Target,
    Executor,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Source => "source",
            StageKind::PushSource => "push_source",
            StageKind::Processor => "processor",
            StageKind::Target => "target",
            StageKind::Executor => "executor",
        };
        f.write_str(name)
    }
}

/// An origin polled by the runner, one batch per call.
#[async_trait]
pub trait Source: Send + Sync {
    async fn init(&self, _ctx: &StageContext) -> Vec<ConfigIssue> {
        Vec::new()
    }

    /// Reads up to `max_batch_size` records after `last_offset` into `batch`
    /// and returns the offset to resume from, or `None` once exhausted.
    async fn produce(
        &self,
        ctx: &StageContext,
        last_offset: Option<&str>,
        max_batch_size: usize,
        batch: &mut BatchContext,
    ) -> Result<Option<String>, StageError>;

    async fn destroy(&self) {}
}

/// An origin that drives the pipeline itself through the context's
/// `start_batch`, `process_batch` and `commit_offset`.
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn init(&self, _ctx: &StageContext) -> Vec<ConfigIssue> {
        Vec::new()
    }

    fn number_of_threads(&self) -> usize {
        1
    }

    /// Runs until the stop token fires or a fatal error occurs.
    async fn produce(
        &self,
        ctx: Arc<StageContext>,
        last_offsets: OffsetMap,
        max_batch_size: usize,
    ) -> Result<(), StageError>;

    async fn destroy(&self) {}
}

#[async_trait]
pub trait Processor: Send + Sync {
    async fn init(&self, _ctx: &StageContext) -> Vec<ConfigIssue> {
        Vec::new()
    }

    async fn process(&self, ctx: &StageContext, batch: Batch) -> Result<Batch, StageError>;

    async fn destroy(&self) {}
}

#[async_trait]
pub trait Target: Send + Sync {
    async fn init(&self, _ctx: &StageContext) -> Vec<ConfigIssue> {
        Vec::new()
    }

    async fn write(&self, ctx: &StageContext, batch: &Batch) -> Result<(), StageError>;

    async fn destroy(&self) {}
}

/// Reacts to batches (usually their events) without producing records.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn init(&self, _ctx: &StageContext) -> Vec<ConfigIssue> {
        Vec::new()
    }

    async fn execute(&self, ctx: &StageContext, batch: &Batch) -> Result<(), StageError>;

    async fn destroy(&self) {}
}

pub enum Stage {
    Source(Box<dyn Source>),
    PushSource(Box<dyn PushSource>),
    Processor(Box<dyn Processor>),
    Target(Box<dyn Target>),
    Executor(Box<dyn Executor>),
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Source(_) => StageKind::Source,
            Stage::PushSource(_) => StageKind::PushSource,
            Stage::Processor(_) => StageKind::Processor,
            Stage::Target(_) => StageKind::Target,
            Stage::Executor(_) => StageKind::Executor,
        }
    }

    pub fn is_origin(&self) -> bool {
        matches!(self, Stage::Source(_) | Stage::PushSource(_))
    }

    async fn init(&self, ctx: &StageContext) -> Vec<ConfigIssue> {
        match self {
            Stage::Source(s) => s.init(ctx).await,
            Stage::PushSource(s) => s.init(ctx).await,
            Stage::Processor(s) => s.init(ctx).await,
            Stage::Target(s) => s.init(ctx).await,
            Stage::Executor(s) => s.init(ctx).await,
        }
    }

    async fn destroy(&self) {
        match self {
            Stage::Source(s) => s.destroy().await,
            Stage::PushSource(s) => s.destroy().await,
            Stage::Processor(s) => s.destroy().await,
            Stage::Target(s) => s.destroy().await,
            Stage::Executor(s) => s.destroy().await,
        }
    }
}
