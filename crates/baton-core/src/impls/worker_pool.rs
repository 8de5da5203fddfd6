//! WorkerPool - the default executor, backed by a tokio runtime.
//!
//! Each admitted job becomes one spawned tokio task holding a worker permit
//! until it finishes. The pool never queues: when every permit is taken, or
//! after `shutdown`, the job is handed back as rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{Instrument, debug, debug_span};

use crate::app::SchedulerConfig;
use crate::domain::RejectedExecution;
use crate::ports::{Executor, Job};

pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_workers: Option<usize>,
    /// Sequence number of the next worker, for tracing.
    spawned: AtomicU64,
}

impl WorkerPool {
    /// Unbounded pool on `handle`.
    pub fn new(handle: Handle) -> Self {
        Self::with_max_workers(handle, None)
    }

    pub fn with_max_workers(handle: Handle, max_workers: Option<usize>) -> Self {
        let permits = max_workers.unwrap_or(Semaphore::MAX_PERMITS);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(permits)),
            max_workers,
            spawned: AtomicU64::new(0),
        }
    }

    pub fn from_config(handle: Handle, config: &SchedulerConfig) -> Self {
        Self::with_max_workers(handle, config.max_workers)
    }

    /// Unbounded pool on the runtime the caller is running in.
    pub fn current() -> Result<Self, TryCurrentError> {
        Ok(Self::new(Handle::try_current()?))
    }

    /// Reject every job from now on. Jobs already running are left alone.
    pub fn shutdown(&self) {
        self.permits.close();
        debug!("worker pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn max_workers(&self) -> Option<usize> {
        self.max_workers
    }

    /// Jobs currently holding a worker.
    pub fn active_workers(&self) -> usize {
        let capacity = self.max_workers.unwrap_or(Semaphore::MAX_PERMITS);
        capacity.saturating_sub(self.permits.available_permits())
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution> {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(RejectedExecution::Shutdown),
            Err(TryAcquireError::NoPermits) => {
                let max_workers = self.max_workers.unwrap_or(Semaphore::MAX_PERMITS);
                debug!(max_workers, "worker pool exhausted");
                return Err(RejectedExecution::Exhausted { max_workers });
            }
        };

        let worker = self.spawned.fetch_add(1, Ordering::Relaxed) + 1;
        let (future, exit) = job.start();
        self.handle.spawn(
            async move {
                // Dropped in reverse: the permit is back before the exit hook runs.
                let _exit = exit;
                let _permit = permit;
                future.await;
            }
            .instrument(debug_span!("worker", worker)),
        );
        Ok(())
    }
}
