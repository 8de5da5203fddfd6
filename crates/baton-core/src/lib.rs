//! baton-core
//!
//! A bounded-concurrency task scheduler. Tasks are created from a
//! [`Request`], enqueued with a [`Callback`], and run by an [`Executor`] one
//! unit of [`Work`] at a time. At most `max_concurrency` tasks run at once;
//! the rest wait FIFO. Any task can be paused (keeping its checkpoint),
//! resumed ahead of the queue, or canceled.
//!
//! # Modules
//! - **domain**: ids, requests, task states and errors
//! - **ports**: Callback, Work and Executor traits
//! - **app**: Scheduler, Dispatcher, Task, config and status views
//! - **impls**: WorkerPool and SimulatedWork
//!
//! The crate logs through `tracing` and never installs a subscriber.

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
mod testing;

pub use app::{
    BuildError, Dispatcher, DispatcherCounts, DispatcherSnapshot, Scheduler, SchedulerBuilder,
    SchedulerConfig, Task, TaskSnapshot,
};
pub use domain::{Request, SchedulerError, TaskError, TaskId, TaskState};
pub use ports::{Callback, Executor, Work};
