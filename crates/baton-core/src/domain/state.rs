//! Task lifecycle states.

use serde::{Deserialize, Serialize};

/// Last unit of work in a task body. Units run `1..=MAX_PROGRESS`.
pub const MAX_PROGRESS: u32 = 100;

/// Where a task is in its lifecycle.
///
/// Transitions:
/// - Created -> Ready (enqueue)
/// - Ready -> Running (promotion)
/// - Ready | Running -> Paused -> Ready (pause / resume)
/// - Running -> Succeeded | Failed
/// - Created | Ready | Running | Paused -> Canceled
///
/// Ready, Running and Paused match membership in the dispatcher's ready queue,
/// running set and paused set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Built but never enqueued.
    Created,
    Ready,
    Running,
    Paused,
    Canceled,
    Succeeded,
    Failed,
}

impl TaskState {
    /// No further transitions happen from here.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Canceled | TaskState::Succeeded | TaskState::Failed
        )
    }

    /// Tracked by one of the dispatcher's collections.
    pub fn is_queued(self) -> bool {
        matches!(
            self,
            TaskState::Ready | TaskState::Running | TaskState::Paused
        )
    }
}
