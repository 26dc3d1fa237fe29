use crate::{
    core::value::{Value, ValueParseError},
    partition::context::OffsetColumn,
    records::record::Record,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const PAIR_SEPARATOR: &str = "::";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OffsetError {
    #[error("Malformed offset '{raw}': {reason}")]
    Malformed { raw: String, reason: String },

    #[error(
        "Stored offset columns [{stored}] of partition '{partition}' do not match configured columns [{configured}]"
    )]
    ColumnMismatch {
        partition: String,
        stored: String,
        configured: String,
    },

    #[error("Offset column '{column}': {source}")]
    InvalidValue {
        column: String,
        #[source]
        source: ValueParseError,
    },

    #[error("Record has no usable value for offset column '{column}'")]
    MissingValue { column: String },
}

/// Resume position inside one partition: one token per offset column, in column order.
///
/// Encoded as `col=value::col2=value2`; `\`, `:` and `=` inside names or values
/// are escaped with a backslash. A bare token without a column name is accepted
/// for single-column partitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionOffset {
    pairs: Vec<(String, String)>,
}

impl PartitionOffset {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        PartitionOffset { pairs }
    }

    /// Parses a stored token and checks it against the configured offset columns
    /// by name, count and order.
    pub fn parse(
        partition: &str,
        raw: &str,
        columns: &[OffsetColumn],
    ) -> Result<PartitionOffset, OffsetError> {
        let segments = split_unescaped(raw);
        let mut pairs = Vec::with_capacity(segments.len());
        let mut bare = Vec::new();

        for segment in &segments {
            match segment.value.as_ref() {
                Some(value) => pairs.push((segment.key.clone(), value.clone())),
                None => bare.push(segment.key.clone()),
            }
        }

        let offset = match (pairs.is_empty(), bare.len()) {
            (true, 1) if columns.len() == 1 => {
                PartitionOffset::new(vec![(columns[0].name.clone(), bare.remove(0))])
            }
            (_, 0) => PartitionOffset::new(pairs),
            _ => {
                return Err(OffsetError::Malformed {
                    raw: raw.to_string(),
                    reason: format!(
                        "expected column=value pairs for {} offset column(s)",
                        columns.len()
                    ),
                });
            }
        };

        offset.validate(partition, columns)?;
        Ok(offset)
    }

    /// Name, count and order must all match; a mismatch means the stored
    /// position would be reinterpreted against different columns.
    pub fn validate(&self, partition: &str, columns: &[OffsetColumn]) -> Result<(), OffsetError> {
        let same = self.pairs.len() == columns.len()
            && self
                .pairs
                .iter()
                .zip(columns)
                .all(|((name, _), col)| name.eq_ignore_ascii_case(&col.name));

        if same {
            return Ok(());
        }

        Err(OffsetError::ColumnMismatch {
            partition: partition.to_string(),
            stored: self.column_names().join(","),
            configured: columns
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
        })
    }

    /// Builds the offset reached after reading `record`.
    pub fn from_record(
        record: &Record,
        columns: &[OffsetColumn],
    ) -> Result<PartitionOffset, OffsetError> {
        let pairs = columns
            .iter()
            .map(|col| {
                record
                    .get(&col.name)
                    .and_then(Value::to_token)
                    .map(|token| (col.name.clone(), token))
                    .ok_or_else(|| OffsetError::MissingValue {
                        column: col.name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PartitionOffset::new(pairs))
    }

    /// Typed values, one per column, for building a bounded read.
    pub fn values(&self, columns: &[OffsetColumn]) -> Result<Vec<Value>, OffsetError> {
        self.pairs
            .iter()
            .zip(columns)
            .map(|((_, token), col)| {
                Value::parse(col.data_type, token).map_err(|source| OffsetError::InvalidValue {
                    column: col.name.clone(),
                    source,
                })
            })
            .collect()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.pairs.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn encode(&self) -> String {
        self.pairs
            .iter()
            .map(|(name, value)| format!("{}={}", escape(name), escape(value)))
            .collect::<Vec<_>>()
            .join(PAIR_SEPARATOR)
    }
}

impl fmt::Display for PartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | ':' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

struct Segment {
    key: String,
    value: Option<String>,
}

fn split_unescaped(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut value: Option<String> = None;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    push_char(&mut key, &mut value, next);
                }
            }
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                segments.push(Segment {
                    key: std::mem::take(&mut key),
                    value: value.take(),
                });
            }
            '=' if value.is_none() => value = Some(String::new()),
            other => push_char(&mut key, &mut value, other),
        }
    }

    segments.push(Segment { key, value });
    segments
}

fn push_char(key: &mut String, value: &mut Option<String>, c: char) {
    match value {
        Some(v) => v.push(c),
        None => key.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data_type::DataType;

    fn cols(names: &[(&str, DataType)]) -> Vec<OffsetColumn> {
        names
            .iter()
            .map(|(n, t)| OffsetColumn::new(*n, *t))
            .collect()
    }

    #[test]
    fn bare_token_resolves_against_single_column() {
        let columns = cols(&[("id", DataType::Int)]);
        let offset = PartitionOffset::parse("A", "3", &columns).unwrap();

        assert_eq!(offset.encode(), "id=3");
        assert_eq!(offset.values(&columns).unwrap(), vec![Value::Int(3)]);
    }

    #[test]
    fn bare_token_is_rejected_for_composite_columns() {
        let columns = cols(&[("region", DataType::String), ("id", DataType::Int)]);
        let err = PartitionOffset::parse("A", "3", &columns).unwrap_err();
        assert!(matches!(err, OffsetError::Malformed { .. }));
    }

    #[test]
    fn escaped_separators_survive_encoding() {
        let columns = cols(&[("ts", DataType::String), ("id", DataType::Int)]);
        let offset = PartitionOffset::new(vec![
            ("ts".into(), "10:30=a\\b".into()),
            ("id".into(), "7".into()),
        ]);

        let parsed = PartitionOffset::parse("A", &offset.encode(), &columns).unwrap();
        assert_eq!(parsed, offset);
    }

    #[test]
    fn reordered_columns_are_a_mismatch() {
        let stored = "id=1::region=eu";
        let columns = cols(&[("region", DataType::String), ("id", DataType::Int)]);

        let err = PartitionOffset::parse("orders", stored, &columns).unwrap_err();
        assert_eq!(
            err,
            OffsetError::ColumnMismatch {
                partition: "orders".into(),
                stored: "id,region".into(),
                configured: "region,id".into(),
            }
        );
    }

    #[test]
    fn offset_follows_last_record() {
        let columns = cols(&[("id", DataType::Int)]);
        let record = Record::new("A").with_field("id", Value::Int(4));

        let offset = PartitionOffset::from_record(&record, &columns).unwrap();
        assert_eq!(offset.encode(), "id=4");

        let empty = Record::new("A");
        assert!(PartitionOffset::from_record(&empty, &columns).is_err());
    }
}
