use async_trait::async_trait;
use connectors::file::jsonl::JsonLinesWriter;
use engine_core::{
    context::StageContext,
    error::{ErrorCode, StageError},
    stage::Target,
};
use model::{execution::issue::ConfigIssue, records::batch::Batch};
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Writes every record as one JSON line. Write failures are routed per batch
/// through the stage's error policy. Preview runs leave the file untouched.
pub struct JsonLinesTarget {
    path: PathBuf,
    writer: OnceCell<JsonLinesWriter>,
}

impl JsonLinesTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonLinesTarget {
            path: path.into(),
            writer: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Target for JsonLinesTarget {
    async fn init(&self, ctx: &StageContext) -> Vec<ConfigIssue> {
        if ctx.is_preview() {
            info!(path = %self.path.display(), "Preview run, JSON lines target disabled");
            return Vec::new();
        }
        match self
            .writer
            .get_or_try_init(|| JsonLinesWriter::open(&self.path))
            .await
        {
            Ok(writer) => {
                info!(path = %writer.path().display(), "JSON lines target ready");
                Vec::new()
            }
            Err(e) => vec![ConfigIssue::for_config(
                "TARGET",
                "target.path",
                "TARGET_02",
                format!("cannot open '{}': {e}", self.path.display()),
            )],
        }
    }

    async fn write(&self, ctx: &StageContext, batch: &Batch) -> Result<(), StageError> {
        if batch.records().is_empty() || ctx.is_preview() {
            return Ok(());
        }
        let writer = self
            .writer
            .get()
            .ok_or_else(|| StageError::IllegalState("JSON lines target is not open".into()))?;

        match writer.append(batch.records()).await {
            Ok(bytes) => {
                debug!(batch_id = %batch.id, records = batch.records().len(), bytes, "Wrote batch");
                Ok(())
            }
            Err(e) => {
                let err = StageError::caused_by(
                    ErrorCode::TargetWrite,
                    vec![self.path.display().to_string()],
                    e,
                );
                ctx.errors().on_batch_error(batch, err)
            }
        }
    }
}
