use model::{events::EventRecord, execution::error_record::ErrorRecord};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

/// Bounded, shared buffer that keeps the most recent `capacity` entries.
#[derive(Debug)]
pub struct BoundedSink<T> {
    entries: Arc<Mutex<VecDeque<T>>>,
    capacity: usize,
}

pub type ErrorSink = BoundedSink<ErrorRecord>;
pub type EventSink = BoundedSink<EventRecord>;

impl<T> Clone for BoundedSink<T> {
    fn clone(&self) -> Self {
        BoundedSink {
            entries: self.entries.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone> BoundedSink<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        BoundedSink {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Adds an entry, evicting the oldest one when full. Returns whether an
    /// entry was evicted.
    pub fn push(&self, entry: T) -> bool {
        let mut entries = self.lock();
        let evicted = entries.len() >= self.capacity;
        if evicted {
            entries.pop_front();
        }
        entries.push_back(entry);
        evicted
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
