use crate::core::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub name: String,
    pub value: Value,
}

/// Error metadata attached to a record routed to the error sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub stage: String,
    pub code: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    source_id: String,
    attributes: BTreeMap<String, String>,
    error: Option<ErrorInfo>,
}

impl Header {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }
}

/// A single structured record: ordered fields plus a header.
///
/// Records are built by the stage that reads them and moved into a batch;
/// a batch only hands out shared references, so a record cannot change
/// once it has been emitted downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    header: Header,
    fields: Vec<FieldValue>,
}

impl Record {
    pub fn new(source_id: impl Into<String>) -> Self {
        Record {
            header: Header {
                source_id: source_id.into(),
                ..Header::default()
            },
            fields: Vec::new(),
        }
    }

    /// Sets a field, keeping the position of an existing field with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.value = value,
            None => self.fields.push(FieldValue { name, value }),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.header.attributes.insert(name.into(), value.into());
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Returns a copy of this record carrying error metadata.
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.header.error = Some(error);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
            .map(|f| &f.value)
    }

    pub fn get_value(&self, field: &str) -> Value {
        self.get(field).cloned().unwrap_or(Value::Null)
    }

    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_keeps_field_order() {
        let mut record = Record::new("t::1")
            .with_field("id", Value::Int(1))
            .with_field("name", Value::from("a"));
        record.set("id", Value::Int(2));

        let names: Vec<_> = record.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(record.get_value("ID"), Value::Int(2));
        assert_eq!(record.get_value("missing"), Value::Null);
    }
}
