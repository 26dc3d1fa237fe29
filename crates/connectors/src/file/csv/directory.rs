use crate::{
    catalog::{ColumnMeta, PartitionCatalog, PartitionDescriptor},
    error::ConnectorError,
    file::csv::{error::FileError, infer::ColumnGuess, settings::CsvSettings},
    query::{OffsetQuery, compare_keys},
    reader::{PartitionReader, RowStream},
    row::{RawCell, RawRow},
};
use async_trait::async_trait;
use futures::StreamExt;
use model::core::value::Value;
use std::{
    cmp::Ordering,
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A directory of CSV files, one partition per file (named by file stem).
///
/// Column types are inferred from the first `sample_size` rows. A column named
/// `id` without empty cells is treated as the key column.
#[derive(Clone)]
pub struct CsvDirectory {
    root: PathBuf,
    settings: CsvSettings,
    partitions: Arc<RwLock<HashMap<String, (PathBuf, PartitionDescriptor)>>>,
}

impl CsvDirectory {
    pub fn new(root: impl Into<PathBuf>, settings: CsvSettings) -> Self {
        CsvDirectory {
            root: root.into(),
            settings,
            partitions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn descriptor(&self, partition: &str) -> Result<(PathBuf, PartitionDescriptor), ConnectorError> {
        if let Some(found) = self.partitions.read().await.get(partition) {
            return Ok(found.clone());
        }

        self.discover().await?;
        self.partitions
            .read()
            .await
            .get(partition)
            .cloned()
            .ok_or_else(|| ConnectorError::PartitionNotFound(partition.to_string()))
    }
}

#[async_trait]
impl PartitionCatalog for CsvDirectory {
    async fn discover(&self) -> Result<Vec<PartitionDescriptor>, ConnectorError> {
        if !self.root.is_dir() {
            return Err(FileError::NotFound(self.root.display().to_string()).into());
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(FileError::from)?;
        while let Some(entry) = entries.next_entry().await.map_err(FileError::from)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
                files.push(path);
            }
        }
        files.sort();

        let mut descriptors = Vec::with_capacity(files.len());
        for path in files {
            let settings = self.settings.clone();
            let sample_path = path.clone();
            let descriptor = tokio::task::spawn_blocking(move || infer(&sample_path, &settings))
                .await
                .map_err(|e| FileError::Join(e.to_string()))??;

            debug!(
                partition = %descriptor.name,
                columns = descriptor.columns.len(),
                "Discovered CSV partition"
            );
            self.partitions
                .write()
                .await
                .insert(descriptor.name.clone(), (path, descriptor.clone()));
            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }
}

#[async_trait]
impl PartitionReader for CsvDirectory {
    async fn open(&self, query: &OffsetQuery) -> Result<RowStream, ConnectorError> {
        let (path, descriptor) = self.descriptor(&query.partition).await?;
        let settings = self.settings.clone();
        let query = query.clone();

        let rows = tokio::task::spawn_blocking(move || read_rows(&path, &settings, &descriptor, &query))
            .await
            .map_err(|e| FileError::Join(e.to_string()))??;

        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

fn reader(path: &Path, settings: &CsvSettings) -> Result<csv::Reader<std::fs::File>, FileError> {
    let file = std::fs::File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(settings.delimiter as u8)
        .has_headers(settings.has_headers)
        .flexible(true)
        .from_reader(file))
}

fn partition_name(path: &Path) -> Result<String, FileError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| FileError::InvalidFormat(format!("unusable file name {}", path.display())))
}

fn infer(path: &Path, settings: &CsvSettings) -> Result<PartitionDescriptor, ConnectorError> {
    let mut rdr = reader(path, settings)?;
    let mut names: Vec<String> = if settings.has_headers {
        rdr.headers()
            .map_err(FileError::from)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect()
    } else {
        Vec::new()
    };
    let mut guesses = vec![ColumnGuess::default(); names.len()];

    for record in rdr.records().take(settings.sample_size) {
        let record = record.map_err(FileError::from)?;
        if guesses.len() < record.len() {
            guesses.resize(record.len(), ColumnGuess::default());
        }
        for (guess, field) in guesses.iter_mut().zip(record.iter()) {
            guess.observe(field);
        }
    }

    while names.len() < guesses.len() {
        names.push(format!("col_{}", names.len()));
    }

    let columns = names
        .into_iter()
        .zip(guesses)
        .enumerate()
        .map(|(ordinal, (name, guess))| ColumnMeta {
            is_primary_key: name.eq_ignore_ascii_case("id") && !guess.is_nullable,
            data_type: guess.resolve(),
            is_nullable: guess.is_nullable,
            name,
            ordinal,
        })
        .collect();

    Ok(PartitionDescriptor {
        name: partition_name(path)?,
        columns,
    })
}

fn read_rows(
    path: &Path,
    settings: &CsvSettings,
    descriptor: &PartitionDescriptor,
    query: &OffsetQuery,
) -> Result<Vec<RawRow>, ConnectorError> {
    let mut rdr = reader(path, settings)?;
    let mut keyed = Vec::new();

    for (idx, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| ConnectorError::Read {
            partition: query.partition.clone(),
            message: e.to_string(),
        })?;

        let row = RawRow {
            source_id: format!("{}::{}", descriptor.name, idx),
            cells: descriptor
                .columns
                .iter()
                .map(|col| RawCell {
                    name: col.name.clone(),
                    data_type: col.data_type,
                    is_nullable: col.is_nullable,
                    raw: record
                        .get(col.ordinal)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string),
                })
                .collect(),
        };

        let key: Option<Vec<Value>> = query
            .columns
            .iter()
            .map(|col| {
                row.cell(&col.name)
                    .and_then(|c| c.raw.as_deref())
                    .and_then(|raw| Value::parse(col.data_type, raw).ok())
            })
            .collect();

        match key {
            Some(key) if query.admits(&key) => keyed.push((key, row)),
            Some(_) => {}
            None => warn!(
                partition = %query.partition,
                row = idx,
                "Skipping row: offset column is empty or unparsable"
            ),
        }
    }

    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b).unwrap_or(Ordering::Equal));

    let limit = query.limit.unwrap_or(usize::MAX);
    Ok(keyed.into_iter().take(limit).map(|(_, row)| row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{core::data_type::DataType, partition::context::OffsetColumn};
    use tempfile::tempdir;

    #[tokio::test]
    async fn discovers_and_reads_partitions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "id,name\n2,x\n1,y\n3,z\n").unwrap();
        std::fs::write(dir.path().join("a.csv"), "id,amount\n1,2.5\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = CsvDirectory::new(dir.path(), CsvSettings::default());
        let found = source.discover().await.unwrap();

        let names: Vec<_> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(found[0].column("amount").unwrap().data_type, DataType::Float);
        assert_eq!(found[1].key_columns()[0].name, "id");

        let query = OffsetQuery::new("b", vec![OffsetColumn::new("id", DataType::Int)])
            .after(Some(vec![Value::Int(1)]));
        let rows: Vec<_> = source.open(&query).await.unwrap().collect().await;
        let names: Vec<_> = rows
            .into_iter()
            .map(|r| r.unwrap().cell("name").unwrap().raw.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["x", "z"]);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let source = CsvDirectory::new("/definitely/not/here", CsvSettings::default());
        assert!(matches!(
            source.discover().await,
            Err(ConnectorError::File(FileError::NotFound(_)))
        ));
    }
}
