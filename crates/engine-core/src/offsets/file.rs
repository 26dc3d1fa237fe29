use crate::{
    error::OffsetStoreError,
    offsets::OffsetStore,
    retry::{RetryDisposition, RetryError, RetryPolicy},
};
use async_trait::async_trait;
use model::offsets::{CURRENT_VERSION, OffsetMap, SourceOffset};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info};

/// JSON offset document on the local filesystem.
///
/// Writes go to a sibling `.tmp` file that is renamed over the target, so a
/// reader sees either the previous or the new document. Reads that hit a
/// missing-then-present race or a half-visible document are retried.
pub struct FileOffsetStore {
    path: PathBuf,
    retry: RetryPolicy,
    write_lock: Mutex<()>,
}

impl FileOffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileOffsetStore {
            path: path.into(),
            retry: RetryPolicy::for_offset_reads(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "offsets".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read_once(&self) -> Result<Option<SourceOffset>, OffsetStoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| OffsetStoreError::Corrupt {
                    path: self.path.clone(),
                    source,
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(OffsetStoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn write_tmp(&self, bytes: &[u8]) -> Result<PathBuf, std::io::Error> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(tmp)
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn load(&self) -> Result<Option<OffsetMap>, OffsetStoreError> {
        let doc = self
            .retry
            .run(
                || self.read_once(),
                |err| match err {
                    OffsetStoreError::Io { .. } | OffsetStoreError::Corrupt { .. } => {
                        RetryDisposition::Retry
                    }
                    _ => RetryDisposition::Stop,
                },
            )
            .await
            .map_err(|err| match err {
                RetryError::AttemptsExceeded(source) => OffsetStoreError::ReadRetriesExhausted {
                    path: self.path.clone(),
                    attempts: self.retry.max_attempts,
                    source: Box::new(source),
                },
                RetryError::Fatal(source) => source,
            })?;

        let Some(mut doc) = doc else {
            debug!(path = %self.path.display(), "No offset file");
            return Ok(None);
        };

        if doc.version > CURRENT_VERSION {
            return Err(OffsetStoreError::UnsupportedVersion {
                found: doc.version,
                supported: CURRENT_VERSION,
            });
        }

        if doc.version < CURRENT_VERSION {
            info!(
                path = %self.path.display(),
                from = doc.version,
                to = CURRENT_VERSION,
                "Upgrading offset document"
            );
            doc.upgrade();
        }

        Ok(Some(doc.into_offsets()))
    }

    async fn save(&self, offsets: &OffsetMap) -> Result<(), OffsetStoreError> {
        let bytes = serde_json::to_vec_pretty(&SourceOffset::new(offsets.clone()))
            .map_err(OffsetStoreError::Encode)?;

        let _guard = self.write_lock.lock().await;
        let io_err = |source| OffsetStoreError::Io {
            path: self.path.clone(),
            source,
        };

        let tmp = self.write_tmp(&bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;

        debug!(path = %self.path.display(), entries = offsets.len(), "Saved offsets");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
