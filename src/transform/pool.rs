use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WorkerPoolError {
    #[error("worker pool is shut down")]
    Closed,
}

/// Bounded pool for batch units: at most `size` units run at once, the rest
/// wait for a permit in submission order.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Runs `unit` once a permit is free. Units submitted after
    /// [`shutdown`](Self::shutdown) resolve to [`WorkerPoolError::Closed`].
    pub fn spawn<F, T>(&self, unit: F) -> JoinHandle<Result<T, WorkerPoolError>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| WorkerPoolError::Closed)?;
            Ok(unit.await)
        })
    }

    /// Waits for running units to finish, then closes the pool.
    pub async fn shutdown(&self) {
        let drained = self.permits.acquire_many(self.size as u32).await;
        self.permits.close();
        drop(drained);
        tracing::debug!(size = self.size, "Worker pool shut down");
    }
}
