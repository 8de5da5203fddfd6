//! Status - point-in-time views of the dispatcher and its tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, TaskState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherCounts {
    pub ready: usize,
    pub running: usize,
    pub paused: usize,
    /// Passes of paused or canceled tasks that have not exited yet.
    pub draining: usize,
}

impl DispatcherCounts {
    /// Nothing queued, running or draining. Paused tasks don't count.
    pub fn is_idle(&self) -> bool {
        self.ready == 0 && self.running == 0 && self.draining == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub request_id: String,
    pub state: TaskState,
    pub progress: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Queue contents in dispatch order (ready is FIFO, front first).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherSnapshot {
    pub max_concurrency: usize,
    pub ready: Vec<TaskSnapshot>,
    pub running: Vec<TaskSnapshot>,
    pub paused: Vec<TaskSnapshot>,
}

impl DispatcherSnapshot {
    pub fn counts(&self) -> DispatcherCounts {
        DispatcherCounts {
            ready: self.ready.len(),
            running: self.running.len(),
            paused: self.paused.len(),
            draining: 0,
        }
    }
}
