//! App - the scheduler itself.
//!
//! - **Scheduler** / **SchedulerBuilder**: wiring and task creation
//! - **Dispatcher**: admission control over ready, running and paused tasks
//! - **Task**: the handle callers pause, resume and cancel
//! - **SchedulerConfig**: tunables, from defaults or the environment
//! - **status**: serializable snapshots and counts

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod scheduler;
pub mod status;
pub mod task;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::config::{ConfigError, SchedulerConfig};
pub use self::dispatcher::{Dispatcher, IdleCallback};
pub use self::scheduler::Scheduler;
pub use self::status::{DispatcherCounts, DispatcherSnapshot, TaskSnapshot};
pub use self::task::Task;
