use crate::records::record::{ErrorInfo, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An entry in a stage's error sink: the failing record (if any) and its cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub stage: String,
    /// `None` when the failure was reported as a bare error code.
    pub record: Option<Record>,
    pub error: ErrorDetail,
    pub entity: Option<String>,
    pub batch_id: Option<String>,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    /// Messages of the underlying causes, outermost first.
    pub causes: Vec<String>,
}

impl ErrorRecord {
    pub fn new(stage: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stage: stage.into(),
            record: None,
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                causes: Vec::new(),
            },
            entity: None,
            batch_id: None,
            failed_at: Utc::now(),
        }
    }

    pub fn for_record(
        stage: impl Into<String>,
        record: Record,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            record: Some(record),
            ..Self::new(stage, code, message)
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_causes(mut self, causes: Vec<String>) -> Self {
        self.error.causes = causes;
        self
    }

    /// The failing record with the error stamped into its header.
    pub fn annotated_record(&self) -> Option<Record> {
        self.record.clone().map(|record| {
            record.with_error(ErrorInfo {
                stage: self.stage.clone(),
                code: self.error.code.clone(),
                message: self.error.message.clone(),
                at: self.failed_at,
            })
        })
    }
}
