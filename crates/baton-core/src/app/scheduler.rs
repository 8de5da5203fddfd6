//! Scheduler - creates tasks bound to one dispatcher.

use std::sync::Arc;

use super::builder::SchedulerBuilder;
use super::dispatcher::Dispatcher;
use super::task::Task;
use crate::domain::Request;
use crate::ports::Work;

/// Entry point: owns the dispatcher and the default task body.
///
/// ```ignore
/// let scheduler = Scheduler::builder().max_concurrency(2).build()?;
/// let task = scheduler.new_task(Request::builder().id("report-7").build());
/// task.enqueue(callback)?;
/// ```
#[derive(Clone)]
pub struct Scheduler {
    dispatcher: Dispatcher,
    default_work: Arc<dyn Work>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn new(dispatcher: Dispatcher, default_work: Arc<dyn Work>) -> Self {
        Self {
            dispatcher,
            default_work,
        }
    }

    /// A new task in the Created state, running the default body.
    pub fn new_task(&self, request: Request) -> Task {
        self.new_task_with(request, Arc::clone(&self.default_work))
    }

    pub fn new_task_with(&self, request: Request, work: Arc<dyn Work>) -> Task {
        Task::new(request, work, self.dispatcher.clone())
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
