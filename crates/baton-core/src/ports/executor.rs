//! Executor port - the execution engine admitted tasks are handed to.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::domain::RejectedExecution;

/// The future half of a [`Job`].
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type ExitHook = Box<dyn FnOnce() + Send + 'static>;

/// A task execution pass, ready to run to completion.
///
/// A job may carry an exit hook. The hook runs once the accepted job is done
/// or dropped, and never for a job that was rejected.
pub struct Job {
    future: JobFuture,
    exit: Option<ExitHook>,
}

impl Job {
    pub fn new(future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            future: Box::pin(future),
            exit: None,
        }
    }

    pub fn on_exit(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.exit = Some(Box::new(hook));
        self
    }

    /// Accept the job. The returned guard runs the exit hook when dropped;
    /// an executor drops its own per-job resources before the guard.
    pub fn start(self) -> (JobFuture, JobExit) {
        (self.future, JobExit(self.exit))
    }

    /// Accept and run the job, then run its exit hook.
    pub async fn run(self) {
        let (future, _exit) = self.start();
        future.await;
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("exit_hook", &self.exit.is_some())
            .finish_non_exhaustive()
    }
}

/// Runs the exit hook of an accepted [`Job`] on drop.
pub struct JobExit(Option<ExitHook>);

impl Drop for JobExit {
    fn drop(&mut self) {
        if let Some(hook) = self.0.take() {
            hook();
        }
    }
}

/// Runs admitted jobs.
///
/// Hand-off is direct: an executor either starts the job right away or
/// rejects it. It never queues; ordering and admission limits live in the
/// dispatcher. `Exhausted` means "no room right now" and the dispatcher will
/// retry; any other rejection fails the task.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution>;
}
