use crate::row::RawRow;
use model::{
    core::{
        data_type::DataType,
        value::{Value, ValueParseError},
    },
    records::record::Record,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Column '{column}' is NULL but not nullable")]
    NullViolation { column: String },

    #[error("Column '{column}': {source}")]
    Conversion {
        column: String,
        #[source]
        source: ValueParseError,
    },
}

/// Turns a raw row into a record.
pub trait RecordMapper: Send + Sync {
    fn map(&self, partition: &str, row: &RawRow) -> Result<Record, MappingError>;
}

/// Parses every cell according to the column type reported by the source.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypedRecordMapper;

impl RecordMapper for TypedRecordMapper {
    fn map(&self, partition: &str, row: &RawRow) -> Result<Record, MappingError> {
        let mut record =
            Record::new(row.source_id.as_str()).with_attribute("partition", partition);

        for cell in &row.cells {
            let value = match cell.raw.as_deref() {
                // empty text is NULL for every type but strings
                Some(raw) if !raw.is_empty() || cell.data_type == DataType::String => {
                    Value::parse(cell.data_type, raw).map_err(|source| {
                        MappingError::Conversion {
                            column: cell.name.clone(),
                            source,
                        }
                    })?
                }
                _ if !cell.is_nullable => {
                    return Err(MappingError::NullViolation {
                        column: cell.name.clone(),
                    });
                }
                _ => Value::Null,
            };
            record.set(cell.name.as_str(), value);
        }

        Ok(record)
    }
}
