use crate::error::ConnectorError;
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Bounded set of source connections, acquire/release only.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    permits: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
}

/// A checked-out connection; returned to the pool on drop.
#[derive(Debug)]
pub struct PooledConnection {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    pub fn new(size: usize, acquire_timeout: Duration) -> Self {
        ConnectionPool {
            permits: Arc::new(Semaphore::new(size)),
            size,
            acquire_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn acquire(&self) -> Result<PooledConnection, ConnectorError> {
        let start = std::time::Instant::now();
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| ConnectorError::PoolTimeout {
            size: self.size,
            waited_ms: start.elapsed().as_millis(),
        })?
        .map_err(|_| ConnectorError::PoolClosed)?;

        debug!(available = self.available(), "Acquired pooled connection");
        Ok(PooledConnection { _permit: permit })
    }

    /// Fails pending and future acquisitions.
    pub fn close(&self) {
        self.permits.close();
    }
}
