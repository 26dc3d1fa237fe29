use crate::{error::OffsetStoreError, offsets::OffsetStore};
use async_trait::async_trait;
use model::offsets::{CURRENT_VERSION, OffsetMap};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize)]
struct StoredOffsets {
    version: u32,
    offsets: OffsetMap,
}

/// Offsets kept in an embedded sled database, one key per pipeline.
pub struct SledOffsetStore {
    db: sled::Db,
    path: PathBuf,
    key: String,
}

impl SledOffsetStore {
    pub fn open(path: impl AsRef<Path>, pipeline: &str) -> Result<Self, OffsetStoreError> {
        let db = sled::open(path.as_ref())?;
        Ok(Self {
            db,
            path: path.as_ref().to_path_buf(),
            key: format!("offsets:{pipeline}"),
        })
    }

    fn decode(bytes: &[u8]) -> Result<StoredOffsets, OffsetStoreError> {
        let stored: StoredOffsets = bincode::deserialize(bytes)?;
        if stored.version > CURRENT_VERSION {
            return Err(OffsetStoreError::UnsupportedVersion {
                found: stored.version,
                supported: CURRENT_VERSION,
            });
        }
        Ok(stored)
    }
}

#[async_trait]
impl OffsetStore for SledOffsetStore {
    async fn load(&self) -> Result<Option<OffsetMap>, OffsetStoreError> {
        match self.db.get(&self.key)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?.offsets)),
            None => Ok(None),
        }
    }

    async fn save(&self, offsets: &OffsetMap) -> Result<(), OffsetStoreError> {
        let bytes = bincode::serialize(&StoredOffsets {
            version: CURRENT_VERSION,
            offsets: offsets.clone(),
        })?;

        // Refuse to overwrite a document written by a newer version.
        let result = self.db.transaction::<_, _, OffsetStoreError>(|tx| {
            if let Some(existing) = tx.get(self.key.as_bytes())? {
                Self::decode(&existing).map_err(ConflictableTransactionError::Abort)?;
            }
            tx.insert(self.key.as_bytes(), bytes.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(e.into()),
        }

        self.db.flush_async().await?;
        Ok(())
    }

    fn location(&self) -> String {
        format!("{} [{}]", self.path.display(), self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn absent_empty_and_saved_states() {
        let dir = tempdir().unwrap();
        let store = SledOffsetStore::open(dir.path(), "orders").unwrap();

        assert_eq!(store.load().await.unwrap(), None);

        store.reset().await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(OffsetMap::new()));

        let mut offsets = OffsetMap::new();
        offsets.insert("A".into(), "id=3".into());
        store.save(&offsets).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(offsets));
    }

    #[tokio::test]
    async fn pipelines_do_not_share_offsets() {
        let dir = tempdir().unwrap();
        let store = SledOffsetStore::open(dir.path(), "orders").unwrap();
        let other = SledOffsetStore {
            db: store.db.clone(),
            path: dir.path().to_path_buf(),
            key: "offsets:users".into(),
        };

        store.reset().await.unwrap();
        assert_eq!(other.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn does_not_overwrite_newer_document() {
        let dir = tempdir().unwrap();
        let store = SledOffsetStore::open(dir.path(), "orders").unwrap();
        let newer = bincode::serialize(&StoredOffsets {
            version: CURRENT_VERSION + 1,
            offsets: OffsetMap::new(),
        })
        .unwrap();
        store.db.insert(store.key.as_bytes(), newer).unwrap();

        assert!(matches!(
            store.save(&OffsetMap::new()).await,
            Err(OffsetStoreError::UnsupportedVersion { .. })
        ));
    }
}
