use crate::settings::{error::SettingsError, validator::SettingsValidator};
use model::execution::policy::OnRecordError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub mod error;
pub mod source;
pub mod validator;

pub use source::{BatchStrategy, PartitionOrdering, TableSourceSettings};

/// Top-level settings of one pipeline run, loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub name: String,
    /// Upper bound the engine passes to `produce`; sources may use less.
    pub max_batch_size: usize,
    /// Preview runs do not persist offsets.
    pub preview: bool,
    pub error_sink_capacity: usize,
    pub event_sink_capacity: usize,
    pub offsets: OffsetStoreSettings,
    pub source: TableSourceSettings,
    pub target: TargetSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            name: "pipeline".to_string(),
            max_batch_size: 1000,
            preview: false,
            error_sink_capacity: 100,
            event_sink_capacity: 100,
            offsets: OffsetStoreSettings::default(),
            source: TableSourceSettings::default(),
            target: TargetSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetBackend {
    #[default]
    File,
    Sled,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetStoreSettings {
    pub backend: OffsetBackend,
    /// Offset file (or sled directory). Resolved by the caller when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    /// Output file for the JSON-lines target.
    pub path: Option<PathBuf>,
    pub on_record_error: Option<OnRecordError>,
}

impl Default for TargetSettings {
    fn default() -> Self {
        TargetSettings {
            path: None,
            on_record_error: Some(OnRecordError::StopPipeline),
        }
    }
}

impl PipelineSettings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn from_file(path: &Path) -> Result<Self, SettingsError> {
        info!(path = %path.display(), "Loading pipeline settings");
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&json)
    }

    /// Returns the settings unchanged if no issue was found.
    pub fn validated(self) -> Result<Self, SettingsError> {
        let issues = SettingsValidator::new(&self).validate();
        if issues.is_empty() {
            Ok(self)
        } else {
            Err(SettingsError::Invalid(issues))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings = PipelineSettings::from_json(
            r#"{"name":"orders","source":{"threads":4,"batch_strategy":"drain"}}"#,
        )
        .unwrap();

        assert_eq!(settings.name, "orders");
        assert_eq!(settings.source.threads, 4);
        assert_eq!(settings.source.batch_strategy, BatchStrategy::Drain);
        assert_eq!(settings.source.max_batch_size, 1000);
        assert_eq!(settings.offsets.backend, OffsetBackend::File);
    }

    #[test]
    fn explicit_null_policy_is_kept() {
        let settings =
            PipelineSettings::from_json(r#"{"source":{"on_record_error":null}}"#).unwrap();
        assert_eq!(settings.source.on_record_error, None);
    }

    #[tokio::test]
    async fn reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineSettings::from_file(&dir.path().join("missing.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
