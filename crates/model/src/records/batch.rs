use crate::{events::EventRecord, records::record::Record};
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// One commit unit: the records read in a cycle plus the offset they advance to.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    /// Entity (partition or single-stream key) the batch was read from.
    pub entity: Option<String>,
    /// Offset token the entity resumes from once this batch is committed.
    pub offset: Option<String>,
    records: Vec<Record>,
    events: Vec<EventRecord>,
    pub manifest: Manifest,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub row_count: usize,
    pub checksum_xxh3: u64, // rolling checksum over the serialized records
}

pub fn manifest_for(records: &[Record]) -> Manifest {
    let checksum = records.iter().fold(0u64, |h, r| {
        let bytes = serde_json::to_vec(r).unwrap_or_default();
        xxh3_64_with_seed(&bytes, h)
    });

    Manifest {
        row_count: records.len(),
        checksum_xxh3: checksum,
    }
}

impl Batch {
    pub fn new(
        entity: Option<String>,
        offset: Option<String>,
        records: Vec<Record>,
        events: Vec<EventRecord>,
    ) -> Self {
        let manifest = manifest_for(&records);
        Batch {
            id: uuid::Uuid::new_v4().to_string(),
            entity,
            offset,
            records,
            events,
            manifest,
            ts: chrono::Utc::now(),
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Replaces the records with the output of a processor, keeping identity and offset.
    pub fn with_records(self, records: Vec<Record>) -> Self {
        let manifest = manifest_for(&records);
        Batch {
            records,
            manifest,
            ..self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.events.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.records.iter().map(|r| r.size_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;

    #[test]
    fn checksum_depends_on_record_order() {
        let a = Record::new("a").with_field("id", Value::Int(1));
        let b = Record::new("b").with_field("id", Value::Int(2));

        let forward = manifest_for(&[a.clone(), b.clone()]);
        let backward = manifest_for(&[b, a]);
        assert_eq!(forward.row_count, 2);
        assert_ne!(forward.checksum_xxh3, backward.checksum_xxh3);
    }
}
