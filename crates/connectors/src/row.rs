use model::core::data_type::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct RawCell {
    pub name: String,
    pub data_type: DataType,
    pub is_nullable: bool,
    /// Textual value as produced by the source, `None` for NULL.
    pub raw: Option<String>,
}

/// A row as returned by a partition read, before mapping to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub source_id: String,
    pub cells: Vec<RawCell>,
}

impl RawRow {
    pub fn cell(&self, name: &str) -> Option<&RawCell> {
        self.cells.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}
