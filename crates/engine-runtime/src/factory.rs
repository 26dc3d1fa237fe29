use crate::{
    error::RuntimeError,
    pipeline::{Pipeline, StageDefinition},
};
use connectors::{
    catalog::PartitionCatalog,
    file::csv::{directory::CsvDirectory, settings::CsvSettings},
    mapper::TypedRecordMapper,
    reader::PartitionReader,
};
use engine_config::settings::{OffsetBackend, OffsetStoreSettings, PipelineSettings};
use engine_core::{
    offsets::{FileOffsetStore, OffsetStore, SledOffsetStore},
    stage::Stage,
};
use engine_processing::{source::TableSource, target::JsonLinesTarget};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

pub const SOURCE_STAGE: &str = "table-source";
pub const TARGET_STAGE: &str = "jsonl-target";

/// Table source over `catalog`/`reader` feeding the JSON-lines target.
pub fn create_table_pipeline(
    settings: PipelineSettings,
    catalog: Arc<dyn PartitionCatalog>,
    reader: Arc<dyn PartitionReader>,
) -> Result<Pipeline, RuntimeError> {
    let target_path = settings
        .target
        .path
        .clone()
        .ok_or_else(|| RuntimeError::Definition("target.path is required".to_string()))?;

    let source = TableSource::new(
        settings.source.clone(),
        catalog,
        reader,
        Arc::new(TypedRecordMapper),
    );
    let source_policy = settings.source.on_record_error;
    let target_policy = settings.target.on_record_error;

    Pipeline::new(
        settings,
        StageDefinition::new(SOURCE_STAGE, Stage::PushSource(Box::new(source)), source_policy),
    )?
    .with_stage(StageDefinition::new(
        TARGET_STAGE,
        Stage::Target(Box::new(JsonLinesTarget::new(target_path))),
        target_policy,
    ))
}

/// One partition per CSV file under `root`.
pub fn create_csv_pipeline(
    settings: PipelineSettings,
    root: impl Into<PathBuf>,
    csv: CsvSettings,
) -> Result<Pipeline, RuntimeError> {
    let directory = Arc::new(CsvDirectory::new(root, csv));
    create_table_pipeline(settings, directory.clone(), directory)
}

/// Opens the configured offset store, falling back to `default_dir` when no
/// path is configured.
pub fn open_offset_store(
    settings: &OffsetStoreSettings,
    pipeline: &str,
    default_dir: &Path,
) -> Result<Arc<dyn OffsetStore>, RuntimeError> {
    let store: Arc<dyn OffsetStore> = match settings.backend {
        OffsetBackend::File => {
            let path = settings
                .path
                .clone()
                .unwrap_or_else(|| default_dir.join(format!("{pipeline}.offsets.json")));
            Arc::new(FileOffsetStore::new(path))
        }
        OffsetBackend::Sled => {
            let path = settings
                .path
                .clone()
                .unwrap_or_else(|| default_dir.join("offsets.sled"));
            Arc::new(SledOffsetStore::open(path, pipeline)?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_pipeline_needs_a_target_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_csv_pipeline(PipelineSettings::default(), dir.path(), CsvSettings::default());
        assert!(matches!(err, Err(RuntimeError::Definition(_))));
    }

    #[test]
    fn default_offset_file_is_named_after_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            open_offset_store(&OffsetStoreSettings::default(), "orders", dir.path()).unwrap();
        assert_eq!(
            store.location(),
            dir.path().join("orders.offsets.json").display().to_string()
        );
    }
}
