//! Error types.
//!
//! Two audiences:
//! - [`SchedulerError`] is returned straight to the caller of a misused API.
//! - [`TaskError`] only ever travels through `Callback::on_failure`.

use thiserror::Error;

use super::TaskId;

/// Error type a task body may return from a unit of work.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Usage errors, surfaced immediately to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("{task} already executed")]
    AlreadyExecuted { task: TaskId },

    #[error("max concurrency must be at least 1, got {0}")]
    InvalidMaxConcurrency(usize),
}

/// Why the executor refused a job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RejectedExecution {
    #[error("worker pool is shut down")]
    Shutdown,

    #[error("worker pool exhausted: all {max_workers} workers busy")]
    Exhausted { max_workers: usize },
}

/// Terminal failure of a task, reported through `on_failure`.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task canceled")]
    Canceled,

    #[error("task body failed: {0}")]
    Execution(#[source] BoxError),

    #[error("task body panicked: {0}")]
    Panicked(String),

    #[error("executor rejected task: {0}")]
    Rejected(#[source] RejectedExecution),
}

impl TaskError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}
