use crate::file::csv::error::FileError;
use chrono::SecondsFormat;
use model::{core::value::Value, records::record::Record};
use serde_json::{Map, Value as Json};
use std::path::{Path, PathBuf};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

/// Appends records to a file as one JSON object per line.
pub struct JsonLinesWriter {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesWriter {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(JsonLinesWriter {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, records: &[Record]) -> Result<usize, FileError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, &to_json(record))?;
            buf.push(b'\n');
        }

        let mut file = self.file.lock().await;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(buf.len())
    }
}

pub fn to_json(record: &Record) -> Json {
    let mut obj = Map::new();
    for field in record.fields() {
        obj.insert(field.name.clone(), value_to_json(&field.value));
    }
    Json::Object(obj)
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Int(v) => Json::from(*v),
        Value::Uint(v) => Json::from(*v),
        Value::Float(v) => Json::from(*v),
        Value::String(v) => Json::from(v.as_str()),
        Value::Boolean(v) => Json::from(*v),
        Value::Bytes(v) => Json::from(v.clone()),
        Value::Date(v) => Json::from(v.format("%Y-%m-%d").to_string()),
        Value::Timestamp(v) => Json::from(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Null => Json::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn appends_one_line_per_record() {
        let dir = tempdir().unwrap();
        let writer = JsonLinesWriter::open(dir.path().join("out/a.jsonl"))
            .await
            .unwrap();

        let records = vec![
            Record::new("a::0").with_field("id", Value::Int(0)),
            Record::new("a::1")
                .with_field("id", Value::Int(1))
                .with_field("note", Value::Null),
        ];
        writer.append(&records).await.unwrap();
        writer.append(&records[..1]).await.unwrap();

        let text = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, vec![r#"{"id":0}"#, r#"{"id":1,"note":null}"#, r#"{"id":0}"#]);
    }
}
