//! Impls - ready-made implementations of the ports.
//!
//! - **WorkerPool**: tokio-backed [`Executor`](crate::ports::Executor)
//! - **SimulatedWork**: a [`Work`](crate::ports::Work) that just sleeps per unit

pub mod simulated;
pub mod worker_pool;

pub use self::simulated::SimulatedWork;
pub use self::worker_pool::WorkerPool;
