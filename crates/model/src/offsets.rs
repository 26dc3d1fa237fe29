use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity key used by sources that are not partitioned.
pub const SINGLE_STREAM_KEY: &str = "$single-stream$";

/// Marker committed by the table source once legacy offsets have been exploded.
pub const TABLE_OFFSET_VERSION_KEY: &str = "$table-source.offset.version$";
pub const TABLE_OFFSET_VERSION: &str = "1";

pub const CURRENT_VERSION: u32 = 2;

/// Entity id to opaque resume token.
pub type OffsetMap = BTreeMap<String, String>;

/// Persisted offset document.
///
/// Version 1 documents carried a single token under `offset`; they are
/// upgraded in place by [`SourceOffset::upgrade`] before reaching callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOffset {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(default)]
    pub offsets: OffsetMap,
}

impl SourceOffset {
    pub fn new(offsets: OffsetMap) -> Self {
        SourceOffset {
            version: CURRENT_VERSION,
            offset: None,
            offsets,
        }
    }

    /// Brings an older document up to [`CURRENT_VERSION`].
    pub fn upgrade(&mut self) {
        if self.version < 2 {
            if let Some(token) = self.offset.take() {
                self.offsets.insert(SINGLE_STREAM_KEY.to_string(), token);
            }
            self.version = 2;
        }
    }

    pub fn into_offsets(self) -> OffsetMap {
        self.offsets
    }
}
