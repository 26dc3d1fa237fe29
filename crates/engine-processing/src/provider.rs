use engine_config::settings::BatchStrategy;
use model::{core::identifiers::WorkerId, partition::context::PartitionContext};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::{
    Notify,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, info, warn};

/// Exclusive right of one worker to read one partition. Handed back with
/// [`PartitionProvider::release`].
#[derive(Debug)]
pub struct PartitionLease {
    partition: Arc<PartitionContext>,
    index: usize,
    worker: WorkerId,
    cycle: u64,
}

impl PartitionLease {
    pub fn partition(&self) -> &PartitionContext {
        &self.partition
    }

    pub fn name(&self) -> &str {
        self.partition.name()
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

/// What happened while a worker held a lease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    pub rows: u64,
    /// The partition returned fewer rows than asked for.
    pub drained: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoMoreDataSignal {
    pub cycle: u64,
    /// Rows read since the previous signal.
    pub record_count: u64,
}

struct ProviderState {
    cycle: u64,
    /// Partitions of the current cycle not yet queued, per worker.
    pending: Vec<VecDeque<usize>>,
    /// Released during the current cycle, waiting for the next one.
    parked: Vec<usize>,
    owners: HashMap<usize, WorkerId>,
    drained: HashSet<usize>,
    signalled: bool,
    records_since_signal: u64,
}

/// Distributes partitions over per-worker queues.
///
/// Every partition is visited once per rotation cycle: a released partition is
/// parked until all others have been released too, then the parked set is
/// dealt round-robin, in global order, into the next cycle.
pub struct PartitionProvider {
    strategy: BatchStrategy,
    partitions: Vec<Arc<PartitionContext>>,
    queues: Vec<mpsc::Sender<PartitionLease>>,
    depth: usize,
    state: Mutex<ProviderState>,
    signal: Notify,
}

impl PartitionProvider {
    /// Returns the provider and one queue per worker; the number of workers is
    /// `min(threads, partitions)`.
    pub fn new(
        partitions: Vec<Arc<PartitionContext>>,
        threads: usize,
        strategy: BatchStrategy,
    ) -> (Arc<Self>, Vec<mpsc::Receiver<PartitionLease>>) {
        let workers = threads.min(partitions.len()).max(1);
        let depth = match strategy {
            BatchStrategy::Rotate => partitions.len().div_ceil(workers).max(1),
            BatchStrategy::Drain => 1,
        };

        let (queues, receivers): (Vec<_>, Vec<_>) =
            (0..workers).map(|_| mpsc::channel(depth)).unzip();

        let mut state = ProviderState {
            cycle: 1,
            pending: vec![VecDeque::new(); workers],
            parked: Vec::new(),
            owners: HashMap::new(),
            drained: HashSet::new(),
            signalled: false,
            records_since_signal: 0,
        };
        for idx in 0..partitions.len() {
            state.pending[idx % workers].push_back(idx);
        }

        let provider = Arc::new(PartitionProvider {
            strategy,
            partitions,
            queues,
            depth,
            state: Mutex::new(state),
            signal: Notify::new(),
        });

        {
            let mut state = provider.lock();
            for worker in 0..workers {
                provider.fill(&mut state, worker);
            }
        }

        info!(
            partitions = provider.partitions.len(),
            workers,
            depth,
            strategy = ?strategy,
            "Partition provider ready"
        );
        (provider, receivers)
    }

    pub fn workers(&self) -> usize {
        self.queues.len()
    }

    pub fn queue_depth(&self) -> usize {
        self.depth
    }

    pub fn strategy(&self) -> BatchStrategy {
        self.strategy
    }

    pub fn cycle(&self) -> u64 {
        self.lock().cycle
    }

    /// Partitions currently queued for or held by a worker.
    pub fn owners(&self) -> Vec<(String, WorkerId)> {
        let state = self.lock();
        let mut owners: Vec<_> = state
            .owners
            .iter()
            .map(|(idx, worker)| (self.partitions[*idx].name().to_string(), *worker))
            .collect();
        owners.sort();
        owners
    }

    pub fn release(&self, lease: PartitionLease, outcome: ReadOutcome) {
        let mut state = self.lock();
        let idx = lease.index;

        if state.owners.remove(&idx) != Some(lease.worker) {
            warn!(
                partition = %lease.name(),
                worker = %lease.worker,
                "Released a partition the worker does not own"
            );
            return;
        }

        if outcome.rows > 0 {
            state.records_since_signal += outcome.rows;
            state.signalled = false;
        }
        if outcome.drained {
            state.drained.insert(idx);
        } else {
            state.drained.remove(&idx);
        }

        state.parked.push(idx);
        self.fill(&mut state, lease.worker.0);

        if state.parked.len() == self.partitions.len() {
            self.next_cycle(&mut state);
        }

        let ready = self.no_more_data_ready(&state);
        drop(state);

        if ready {
            self.signal.notify_one();
        }
    }

    /// Takes the pending no-more-data signal, if every partition has been
    /// drained since the last one and rows were read in between.
    pub fn take_no_more_data(&self) -> Option<NoMoreDataSignal> {
        let mut state = self.lock();
        if !self.no_more_data_ready(&state) {
            return None;
        }

        state.signalled = true;
        state.drained.clear();
        Some(NoMoreDataSignal {
            cycle: state.cycle,
            record_count: std::mem::take(&mut state.records_since_signal),
        })
    }

    pub async fn no_more_data(&self) -> NoMoreDataSignal {
        loop {
            if let Some(signal) = self.take_no_more_data() {
                return signal;
            }
            self.signal.notified().await;
        }
    }

    fn no_more_data_ready(&self, state: &ProviderState) -> bool {
        !state.signalled
            && !self.partitions.is_empty()
            && state.drained.len() == self.partitions.len()
    }

    fn next_cycle(&self, state: &mut ProviderState) {
        state.cycle += 1;
        let mut parked = std::mem::take(&mut state.parked);
        parked.sort_unstable();

        let workers = self.queues.len();
        for idx in parked {
            state.pending[idx % workers].push_back(idx);
        }
        for worker in 0..workers {
            self.fill(state, worker);
        }

        debug!(cycle = state.cycle, "Starting rotation cycle");
    }

    fn fill(&self, state: &mut ProviderState, worker: usize) {
        while let Some(&idx) = state.pending[worker].front() {
            let lease = PartitionLease {
                partition: self.partitions[idx].clone(),
                index: idx,
                worker: WorkerId(worker),
                cycle: state.cycle,
            };

            match self.queues[worker].try_send(lease) {
                Ok(()) => {
                    state.pending[worker].pop_front();
                    state.owners.insert(idx, WorkerId(worker));
                }
                Err(TrySendError::Full(_)) => break,
                Err(TrySendError::Closed(_)) => {
                    debug!(worker, "Worker queue closed");
                    break;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
