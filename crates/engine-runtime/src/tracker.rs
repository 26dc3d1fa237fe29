use engine_core::{error::OffsetStoreError, offsets::OffsetStore};
use model::offsets::OffsetMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// In-memory view of a pipeline's offsets, written through to the store on
/// every commit. Preview runs never persist.
pub struct OffsetTracker {
    store: Arc<dyn OffsetStore>,
    offsets: Mutex<OffsetMap>,
    persist: bool,
}

impl OffsetTracker {
    pub fn new(store: Arc<dyn OffsetStore>, persist: bool) -> Self {
        OffsetTracker {
            store,
            offsets: Mutex::new(OffsetMap::new()),
            persist,
        }
    }

    /// Loads the stored offsets. A store that was never written starts empty.
    pub async fn load(&self) -> Result<OffsetMap, OffsetStoreError> {
        let loaded = match self.store.load().await? {
            Some(offsets) => {
                info!(
                    location = %self.store.location(),
                    entities = offsets.len(),
                    "Loaded offsets"
                );
                offsets
            }
            None => {
                info!(location = %self.store.location(), "No stored offsets, starting fresh");
                OffsetMap::new()
            }
        };

        *self.offsets.lock().await = loaded.clone();
        Ok(loaded)
    }

    /// `None` removes the entity.
    pub async fn commit(&self, entity: &str, offset: Option<&str>) -> Result<(), OffsetStoreError> {
        let mut offsets = self.offsets.lock().await;
        match offset {
            Some(token) => {
                offsets.insert(entity.to_string(), token.to_string());
            }
            None => {
                offsets.remove(entity);
            }
        }

        if self.persist {
            self.store.save(&offsets).await?;
        }
        debug!(entity, offset = ?offset, persisted = self.persist, "Committed offset");
        Ok(())
    }

    pub async fn snapshot(&self) -> OffsetMap {
        self.offsets.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::offsets::FileOffsetStore;

    #[tokio::test]
    async fn commits_are_written_through() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileOffsetStore::new(dir.path().join("offsets.json")));
        let tracker = OffsetTracker::new(store.clone(), true);

        assert!(tracker.load().await.unwrap().is_empty());
        tracker.commit("A", Some("id=1")).await.unwrap();
        tracker.commit("B", Some("id=7")).await.unwrap();
        tracker.commit("B", None).await.unwrap();

        let stored = store.load().await.unwrap().unwrap();
        assert_eq!(stored, OffsetMap::from([("A".to_string(), "id=1".to_string())]));
        assert_eq!(tracker.snapshot().await, stored);
    }

    #[tokio::test]
    async fn preview_keeps_offsets_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileOffsetStore::new(dir.path().join("offsets.json")));
        let tracker = OffsetTracker::new(store.clone(), false);

        tracker.commit("A", Some("id=1")).await.unwrap();

        assert!(store.load().await.unwrap().is_none());
        assert_eq!(tracker.snapshot().await.len(), 1);
    }
}
