use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug};

pub const NO_MORE_DATA: &str = "no-more-data";

/// A trait for events that can be published on the EventBus.
pub trait Event: Send + Sync + Debug + 'static {
    /// Returns a unique identifier for this event type.
    fn event_type(&self) -> &'static str;
}

/// Structured event travelling inside a batch next to the data records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    pub version: u32,
    pub source: String,
    pub attributes: BTreeMap<String, String>,
    pub ts: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(event_type: impl Into<String>, version: u32, source: impl Into<String>) -> Self {
        EventRecord {
            event_type: event_type.into(),
            version,
            source: source.into(),
            attributes: BTreeMap::new(),
            ts: Utc::now(),
        }
    }

    pub fn no_more_data(source: impl Into<String>, record_count: u64) -> Self {
        EventRecord::new(NO_MORE_DATA, 1, source).with_attribute("record-count", record_count)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(name.into(), value.to_string());
        self
    }

    pub fn is_no_more_data(&self) -> bool {
        self.event_type == NO_MORE_DATA
    }
}

/// Emitted once every partition of a multithreaded origin has been drained.
#[derive(Debug, Clone)]
pub struct NoMoreData {
    pub stage: String,
    pub cycle: u64,
    pub record_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl Event for NoMoreData {
    fn event_type(&self) -> &'static str {
        NO_MORE_DATA
    }
}

/// Emitted when a batch has been handed to every downstream stage.
#[derive(Debug, Clone)]
pub struct BatchProcessed {
    pub stage: String,
    pub batch_id: String,
    pub entity: Option<String>,
    pub row_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl Event for BatchProcessed {
    fn event_type(&self) -> &'static str {
        "batch.processed"
    }
}

/// Emitted after an entity's offset has been persisted.
#[derive(Debug, Clone)]
pub struct OffsetCommitted {
    pub stage: String,
    pub entity: String,
    pub offset: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event for OffsetCommitted {
    fn event_type(&self) -> &'static str {
        "offset.committed"
    }
}
