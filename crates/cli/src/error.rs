use engine_config::settings::error::SettingsError;
use engine_core::error::OffsetStoreError;
use engine_runtime::error::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to load the pipeline settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to run the pipeline: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Offset store error: {0}")]
    OffsetStore(#[from] OffsetStoreError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
