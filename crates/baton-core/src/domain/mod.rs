//! Domain model (ids, requests, task states, errors).
//!
//! Nothing in here knows about locks, workers or runtimes; these are the plain
//! values that the dispatcher moves around.

pub mod errors;
pub mod ids;
pub mod request;
pub mod state;

pub use self::errors::{BoxError, RejectedExecution, SchedulerError, TaskError};
pub use self::ids::TaskId;
pub use self::request::{Request, RequestBuilder};
pub use self::state::{MAX_PROGRESS, TaskState};
