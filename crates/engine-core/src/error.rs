use model::execution::issue::ConfigIssue;
use std::{error::Error, fmt, path::PathBuf};
use thiserror::Error;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Stable error codes surfaced in error records and fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    RecordMapping,
    ReadFailed,
    ConnectionUnavailable,
    InvalidOffset,
    OffsetColumnMismatch,
    OffsetCommit,
    WorkerFailed,
    ProcessorFailed,
    TargetWrite,
    IllegalState,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::RecordMapping => "ROW_01",
            ErrorCode::ReadFailed => "READ_01",
            ErrorCode::ConnectionUnavailable => "READ_02",
            ErrorCode::InvalidOffset => "OFFSET_01",
            ErrorCode::OffsetColumnMismatch => "OFFSET_02",
            ErrorCode::OffsetCommit => "OFFSET_03",
            ErrorCode::WorkerFailed => "STAGE_01",
            ErrorCode::ProcessorFailed => "STAGE_02",
            ErrorCode::TargetWrite => "TARGET_01",
            ErrorCode::IllegalState => "CONTAINER_01",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::RecordMapping => "Row could not be converted to a record",
            ErrorCode::ReadFailed => "Partition read failed",
            ErrorCode::ConnectionUnavailable => "No connection available",
            ErrorCode::InvalidOffset => "Stored offset is invalid",
            ErrorCode::OffsetColumnMismatch => "Stored offset does not match the offset columns",
            ErrorCode::OffsetCommit => "Offset could not be committed",
            ErrorCode::WorkerFailed => "Worker terminated unexpectedly",
            ErrorCode::ProcessorFailed => "Processor failed",
            ErrorCode::TargetWrite => "Target write failed",
            ErrorCode::IllegalState => "Illegal state",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    /// A coded failure. `params` are the values the message was built from.
    #[error("{code} - {message}")]
    Coded {
        code: ErrorCode,
        message: String,
        params: Vec<String>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Pipeline stopped by stage '{stage}': {cause}")]
    PipelineStopped {
        stage: String,
        #[source]
        cause: Box<StageError>,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid configuration: {}", join_issues(.0))]
    Invalid(Vec<ConfigIssue>),

    #[error("Offset store failure: {0}")]
    OffsetStore(#[from] OffsetStoreError),
}

impl StageError {
    pub fn new(code: ErrorCode, params: Vec<String>) -> Self {
        let message = if params.is_empty() {
            code.message().to_string()
        } else {
            format!("{}: {}", code.message(), params.join(", "))
        };

        StageError::Coded {
            code,
            message,
            params,
            source: None,
        }
    }

    pub fn caused_by(code: ErrorCode, params: Vec<String>, source: impl Into<BoxError>) -> Self {
        let mut err = StageError::new(code, params);
        if let StageError::Coded { source: slot, .. } = &mut err {
            *slot = Some(source.into());
        }
        err
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            StageError::Coded { code, .. } => *code,
            StageError::PipelineStopped { cause, .. } => cause.code(),
            StageError::IllegalState(_) => ErrorCode::IllegalState,
            StageError::Invalid(_) => ErrorCode::IllegalState,
            StageError::OffsetStore(_) => ErrorCode::OffsetCommit,
        }
    }

    /// Message without the code prefix, used for error records.
    pub fn message(&self) -> String {
        match self {
            StageError::Coded { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Messages of every error in the `source()` chain below `err`.
pub fn cause_chain(err: &(dyn Error + 'static)) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes
}

#[derive(Debug, Error)]
pub enum OffsetStoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Offset document {} is not readable: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode offsets: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Offset document version {found} is newer than the supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Could not read offsets from {} after {attempts} attempts", path.display())]
    ReadRetriesExhausted {
        path: PathBuf,
        attempts: usize,
        #[source]
        source: Box<OffsetStoreError>,
    },

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coded_error_formats_params() {
        let err = StageError::new(ErrorCode::ReadFailed, vec!["orders".into()]);
        assert_eq!(err.to_string(), "READ_01 - Partition read failed: orders");
        assert_eq!(err.code(), ErrorCode::ReadFailed);
    }

    #[test]
    fn stop_keeps_the_cause_chain() {
        let io = std::io::Error::other("connection reset");
        let read = StageError::caused_by(ErrorCode::ReadFailed, vec!["A".into()], io);
        let stopped = StageError::PipelineStopped {
            stage: "table-source".into(),
            cause: Box::new(read),
        };

        assert_eq!(stopped.code(), ErrorCode::ReadFailed);
        assert_eq!(
            cause_chain(&stopped),
            vec![
                "READ_01 - Partition read failed: A".to_string(),
                "connection reset".to_string()
            ]
        );
    }
}
