use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    records_processed: AtomicU64,
    batches_processed: AtomicU64,
    error_records: AtomicU64,
    discarded_records: AtomicU64,
    offsets_committed: AtomicU64,
    no_more_data_events: AtomicU64,
}

/// Run-wide counters shared by every stage and worker.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_processed: u64,
    pub batches_processed: u64,
    pub error_records: u64,
    pub discarded_records: u64,
    pub offsets_committed: u64,
    pub no_more_data_events: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_records(&self, count: u64) {
        self.inner
            .records_processed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_batches(&self, count: u64) {
        self.inner
            .batches_processed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_error_records(&self, count: u64) {
        self.inner.error_records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_discarded(&self, count: u64) {
        self.inner
            .discarded_records
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_commits(&self, count: u64) {
        self.inner
            .offsets_committed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_no_more_data(&self) {
        self.inner
            .no_more_data_events
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_processed: self.inner.records_processed.load(Ordering::Relaxed),
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
            error_records: self.inner.error_records.load(Ordering::Relaxed),
            discarded_records: self.inner.discarded_records.load(Ordering::Relaxed),
            offsets_committed: self.inner.offsets_committed.load(Ordering::Relaxed),
            no_more_data_events: self.inner.no_more_data_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
