use connectors::{error::ConnectorError, mapper::MappingError};
use engine_core::error::{ErrorCode, StageError};
use model::partition::offset::OffsetError;

pub fn read_failed(partition: &str, err: ConnectorError) -> StageError {
    StageError::caused_by(ErrorCode::ReadFailed, vec![partition.to_string()], err)
}

pub fn connection_unavailable(partition: &str, err: ConnectorError) -> StageError {
    StageError::caused_by(
        ErrorCode::ConnectionUnavailable,
        vec![partition.to_string()],
        err,
    )
}

pub fn mapping_failed(partition: &str, source_id: &str, err: MappingError) -> StageError {
    StageError::caused_by(
        ErrorCode::RecordMapping,
        vec![partition.to_string(), source_id.to_string()],
        err,
    )
}

/// Column mismatches get their own code; both are fatal to the run.
pub fn offset_failed(partition: &str, err: OffsetError) -> StageError {
    let code = match err {
        OffsetError::ColumnMismatch { .. } => ErrorCode::OffsetColumnMismatch,
        _ => ErrorCode::InvalidOffset,
    };
    StageError::caused_by(code, vec![partition.to_string()], err)
}
