//! Ports - the seams between the scheduler and its collaborators.
//!
//! - **Callback**: observer notified as a task runs
//! - **Work**: the body of a task, one unit at a time
//! - **Executor**: where admitted tasks actually run

pub mod callback;
pub mod executor;
pub mod work;

pub use self::callback::Callback;
pub use self::executor::{Executor, Job, JobExit, JobFuture};
pub use self::work::{FnWork, Work, work_fn};
