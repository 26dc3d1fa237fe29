use crate::error::OffsetStoreError;
use async_trait::async_trait;
use model::offsets::OffsetMap;

pub mod file;
pub mod sled_store;

pub use file::FileOffsetStore;
pub use sled_store::SledOffsetStore;

/// Durable resume positions of one pipeline.
///
/// `load` returns `None` when nothing was ever saved, which is distinct from
/// `Some` of an empty map (the state after `reset`).
#[async_trait]
pub trait OffsetStore: Send + Sync {
    async fn load(&self) -> Result<Option<OffsetMap>, OffsetStoreError>;

    async fn save(&self, offsets: &OffsetMap) -> Result<(), OffsetStoreError>;

    async fn reset(&self) -> Result<(), OffsetStoreError> {
        self.save(&OffsetMap::new()).await
    }

    fn location(&self) -> String;
}
