use serde::{Deserialize, Serialize};
use std::fmt;

/// What a stage does with a record (or batch) it failed to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnRecordError {
    /// Drop the record without a trace.
    Discard,
    /// Send the record and its cause to the error sink.
    ToError,
    /// Abort the pipeline.
    StopPipeline,
}

impl fmt::Display for OnRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OnRecordError::Discard => "discard",
            OnRecordError::ToError => "to_error",
            OnRecordError::StopPipeline => "stop_pipeline",
        };
        f.write_str(s)
    }
}
