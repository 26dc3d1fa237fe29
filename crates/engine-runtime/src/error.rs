use engine_config::settings::error::SettingsError;
use engine_core::error::{OffsetStoreError, StageError};
use model::execution::issue::ConfigIssue;
use thiserror::Error;

/// Top-level errors of a pipeline run.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// One or more stages reported configuration issues during init.
    #[error("Pipeline '{pipeline}' failed validation with {} issue(s)", .issues.len())]
    Invalid {
        pipeline: String,
        issues: Vec<ConfigIssue>,
    },

    #[error("Pipeline definition error: {0}")]
    Definition(String),

    /// A stage failed while the pipeline was running.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Offset store error: {0}")]
    OffsetStore(#[from] OffsetStoreError),

    /// Setting error.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl RuntimeError {
    pub fn stage(stage: impl Into<String>, source: StageError) -> Self {
        RuntimeError::Stage {
            stage: stage.into(),
            source,
        }
    }

    /// The stage error behind a failed run, if any.
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            RuntimeError::Stage { source, .. } => Some(source),
            _ => None,
        }
    }
}
