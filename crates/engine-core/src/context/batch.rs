use model::{events::EventRecord, records::record::Record};

/// Records and events collected by one producer task before they are handed
/// off with `StageContext::process_batch`. Each task builds its own.
#[derive(Debug, Default)]
pub struct BatchContext {
    records: Vec<Record>,
    events: Vec<EventRecord>,
}

impl BatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BatchContext {
            records: Vec::with_capacity(capacity),
            events: Vec::new(),
        }
    }

    pub fn add_record(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn add_event(&mut self, event: EventRecord) {
        self.events.push(event);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.events.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Record>, Vec<EventRecord>) {
        (self.records, self.events)
    }
}
