use crate::{
    error::{StageError, cause_chain},
    metrics::Metrics,
};
use model::{
    core::identifiers::StageId,
    execution::{error_record::ErrorRecord, policy::OnRecordError},
    records::{batch::Batch, record::Record},
};
use tracing::{debug, error};

pub mod sink;

pub use sink::{BoundedSink, ErrorSink, EventSink};

/// Routes failures raised by a stage according to its fixed on-record-error
/// policy.
pub struct ErrorRecordHandler {
    stage: StageId,
    policy: Option<OnRecordError>,
    sink: ErrorSink,
    metrics: Metrics,
}

impl ErrorRecordHandler {
    pub fn new(
        stage: StageId,
        policy: Option<OnRecordError>,
        sink: ErrorSink,
        metrics: Metrics,
    ) -> Self {
        ErrorRecordHandler {
            stage,
            policy,
            sink,
            metrics,
        }
    }

    pub fn policy(&self) -> Result<OnRecordError, StageError> {
        self.policy.ok_or_else(|| {
            StageError::IllegalState(format!(
                "stage '{}' has no on-record-error policy",
                self.stage
            ))
        })
    }

    pub fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    /// An error that is not tied to any record.
    pub fn on_error(&self, err: StageError) -> Result<(), StageError> {
        match self.policy()? {
            OnRecordError::Discard => {
                debug!(stage = %self.stage, code = %err.code(), "Discarded error");
                Ok(())
            }
            OnRecordError::ToError => {
                let failed = ErrorRecord::new(self.stage.as_str(), err.code().code(), err.message())
                    .with_causes(cause_chain(&err));
                self.report(failed);
                Ok(())
            }
            OnRecordError::StopPipeline => Err(self.stop(err)),
        }
    }

    pub fn on_record_error(&self, record: Record, err: StageError) -> Result<(), StageError> {
        match self.policy()? {
            OnRecordError::Discard => {
                self.metrics.increment_discarded(1);
                Ok(())
            }
            OnRecordError::ToError => {
                self.report(self.record_error(record, &err, None));
                Ok(())
            }
            OnRecordError::StopPipeline => Err(self.stop(err)),
        }
    }

    /// Every record of the batch is routed under the same cause.
    pub fn on_batch_error(&self, batch: &Batch, err: StageError) -> Result<(), StageError> {
        match self.policy()? {
            OnRecordError::Discard => {
                self.metrics.increment_discarded(batch.records().len() as u64);
                Ok(())
            }
            OnRecordError::ToError => {
                for record in batch.records() {
                    self.report(self.record_error(record.clone(), &err, Some(batch)));
                }
                Ok(())
            }
            OnRecordError::StopPipeline => Err(self.stop(err)),
        }
    }

    fn record_error(&self, record: Record, err: &StageError, batch: Option<&Batch>) -> ErrorRecord {
        let entity = record
            .header()
            .attribute("partition")
            .map(str::to_string)
            .or_else(|| batch.and_then(|b| b.entity.clone()));

        let mut failed =
            ErrorRecord::for_record(self.stage.as_str(), record, err.code().code(), err.message())
                .with_causes(cause_chain(err));
        if let Some(entity) = entity {
            failed = failed.with_entity(entity);
        }
        if let Some(batch) = batch {
            failed = failed.with_batch(batch.id.clone());
        }
        failed
    }

    fn report(&self, failed: ErrorRecord) {
        debug!(
            stage = %self.stage,
            code = %failed.error.code,
            entity = failed.entity.as_deref().unwrap_or("-"),
            "Error record"
        );
        self.metrics.increment_error_records(1);
        self.sink.push(failed);
    }

    fn stop(&self, err: StageError) -> StageError {
        error!(stage = %self.stage, error = %err, "Stopping pipeline on error");
        StageError::PipelineStopped {
            stage: self.stage.to_string(),
            cause: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use model::core::value::Value;

    fn handler(policy: Option<OnRecordError>) -> ErrorRecordHandler {
        ErrorRecordHandler::new(
            StageId::new("table-source"),
            policy,
            ErrorSink::new(10),
            Metrics::new(),
        )
    }

    fn record(id: i64) -> Record {
        Record::new(format!("A::{id}"))
            .with_field("id", Value::Int(id))
            .with_attribute("partition", "A")
    }

    fn mapping_error() -> StageError {
        StageError::caused_by(
            ErrorCode::RecordMapping,
            vec!["amount".into()],
            std::io::Error::other("not a number"),
        )
    }

    #[test]
    fn discard_leaves_no_trace() {
        let h = handler(Some(OnRecordError::Discard));
        h.on_record_error(record(1), mapping_error()).unwrap();
        h.on_error(mapping_error()).unwrap();

        assert!(h.sink().is_empty());
        assert_eq!(h.metrics.snapshot().error_records, 0);
    }

    #[test]
    fn to_error_keeps_record_and_cause() {
        let h = handler(Some(OnRecordError::ToError));
        h.on_record_error(record(7), mapping_error()).unwrap();

        let errors = h.sink().snapshot();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error.code, "ROW_01");
        assert_eq!(errors[0].entity.as_deref(), Some("A"));
        assert_eq!(errors[0].error.causes, vec!["not a number".to_string()]);
        assert_eq!(
            errors[0].record.as_ref().unwrap().get_value("id"),
            Value::Int(7)
        );
    }

    #[test]
    fn batch_errors_route_each_record() {
        let h = handler(Some(OnRecordError::ToError));
        let batch = Batch::new(
            Some("A".into()),
            Some("id=2".into()),
            vec![record(1), record(2)],
            Vec::new(),
        );

        h.on_batch_error(&batch, StageError::new(ErrorCode::TargetWrite, vec![]))
            .unwrap();

        let errors = h.sink().snapshot();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.batch_id.as_deref() == Some(batch.id.as_str())));
    }

    #[test]
    fn stop_pipeline_is_fatal() {
        let h = handler(Some(OnRecordError::StopPipeline));
        let err = h.on_record_error(record(1), mapping_error()).unwrap_err();

        assert!(matches!(err, StageError::PipelineStopped { .. }));
        assert_eq!(err.code(), ErrorCode::RecordMapping);
        assert!(h.sink().is_empty());
    }

    #[test]
    fn missing_policy_is_illegal_state() {
        let h = handler(None);
        assert!(matches!(
            h.on_error(mapping_error()),
            Err(StageError::IllegalState(_))
        ));
    }
}
