//! Callback port - lifecycle observer bound at enqueue time.

use crate::app::Task;
use crate::domain::TaskError;

/// Observer of one task's execution.
///
/// Invoked synchronously on the worker that runs the task, except for
/// cancellation, which is reported on the thread that called `cancel()`.
/// Exactly one of `on_success` / `on_failure` fires per task.
///
/// # Example
/// ```ignore
/// struct Print;
///
/// impl Callback for Print {
///     fn on_success(&self, task: &Task) {
///         println!("{} done", task.request().id());
///     }
///
///     fn on_failure(&self, task: &Task, error: TaskError) {
///         println!("{} failed: {error}", task.request().id());
///     }
/// }
/// ```
pub trait Callback: Send + Sync {
    /// Once, before the first unit of work.
    fn on_start(&self, _task: &Task) {}

    /// After every completed unit of work.
    fn on_progress_changed(&self, _task: &Task) {}

    fn on_success(&self, task: &Task);

    fn on_failure(&self, task: &Task, error: TaskError);
}
