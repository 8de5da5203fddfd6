//! SchedulerBuilder - wiring of config, executor and default work.
//!
//! Everything is validated in `build()`, so a misconfigured scheduler never
//! exists.

use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};

use super::config::{ConfigError, SchedulerConfig};
use super::dispatcher::{Dispatcher, IdleCallback};
use super::scheduler::Scheduler;
use crate::domain::SchedulerError;
use crate::impls::{SimulatedWork, WorkerPool};
use crate::ports::{Executor, Work};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("no executor given and no tokio runtime to build a worker pool on")]
    NoRuntime(#[source] TryCurrentError),
}

/// Builds a [`Scheduler`].
///
/// Without an explicit executor, `build()` creates a [`WorkerPool`] on the
/// current tokio runtime, sized by `config.max_workers`. Without explicit
/// work, tasks run [`SimulatedWork`] with `config.unit_delay`.
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    executor: Option<Arc<dyn Executor>>,
    default_work: Option<Arc<dyn Work>>,
    idle_callback: Option<IdleCallback>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn default_work(mut self, work: Arc<dyn Work>) -> Self {
        self.default_work = Some(work);
        self
    }

    pub fn idle_callback(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.idle_callback = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        self.config.validate()?;

        let executor = match self.executor {
            Some(executor) => executor,
            None => {
                let handle = Handle::try_current().map_err(BuildError::NoRuntime)?;
                Arc::new(WorkerPool::from_config(handle, &self.config))
            }
        };
        let default_work = self
            .default_work
            .unwrap_or_else(|| Arc::new(SimulatedWork::new(self.config.unit_delay())));

        let dispatcher = Dispatcher::new(executor, self.config.max_concurrency)?;
        if let Some(callback) = self.idle_callback {
            dispatcher.set_idle_callback_arc(callback);
        }
        Ok(Scheduler::new(dispatcher, default_work))
    }
}
