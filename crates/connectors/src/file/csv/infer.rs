use model::core::{data_type::DataType, value::Value};

/// Candidate types, narrowest first.
const CHAIN: &[DataType] = &[
    DataType::Int,
    DataType::Float,
    DataType::Boolean,
    DataType::Date,
    DataType::Timestamp,
    DataType::String,
];

fn can_parse(data_type: DataType, value: &str) -> bool {
    value.is_empty() || Value::parse(data_type, value).is_ok()
}

/// Column type seen so far while sampling a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnGuess {
    pub data_type: Option<DataType>,
    pub is_nullable: bool,
}

impl ColumnGuess {
    /// Widens the guess so that `value` still fits.
    ///
    /// Int widens to Float; any other conflict falls back to String, since
    /// earlier samples may not parse under an unrelated type.
    pub fn observe(&mut self, value: &str) {
        if value.is_empty() {
            self.is_nullable = true;
            return;
        }

        self.data_type = Some(match self.data_type {
            None => CHAIN
                .iter()
                .copied()
                .find(|t| can_parse(*t, value))
                .unwrap_or(DataType::String),
            Some(current) if can_parse(current, value) => current,
            Some(DataType::Int) if can_parse(DataType::Float, value) => DataType::Float,
            Some(_) => DataType::String,
        });
    }

    pub fn resolve(&self) -> DataType {
        self.data_type.unwrap_or(DataType::String)
    }
}
