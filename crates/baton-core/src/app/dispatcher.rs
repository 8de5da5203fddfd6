//! Dispatcher - admission control over the ready, running and paused sets.
//!
//! # Locking
//! One mutex guards [`DispatcherState`]. Every membership change and every
//! task state transition caused by enqueue/pause/resume/cancel/finished runs
//! under it; a task's own lock is only ever taken *inside* it, never the other
//! way around. Submission to the executor and all callbacks happen after the
//! dispatcher lock is released.
//!
//! # Draining
//! Pausing or canceling a running task frees its running slot immediately. The
//! execution pass it had is parked in `draining` until the body notices the
//! stop signal and exits, at which point `finished` releases it.
//!
//! # Rejections
//! A pass the executor refuses never runs, so nothing calls `finished` for
//! it. Promotion settles it in place: `Exhausted` puts the task back at the
//! head of the ready queue, anything else fails it and promotes again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::status::{DispatcherCounts, DispatcherSnapshot};
use super::task::{Pass, Task};
use crate::domain::{RejectedExecution, SchedulerError, TaskId, TaskState};
use crate::ports::Executor;

/// Invoked when the dispatcher runs out of work.
pub type IdleCallback = Arc<dyn Fn() + Send + Sync>;

/// Shared handle to the scheduling state; clones refer to the same queues.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<DispatcherState>,
    executor: Arc<dyn Executor>,
}

/// A task occupying an execution pass.
struct Slot {
    task: Task,
    pass: u64,
}

struct DispatcherState {
    /// FIFO; resumed tasks go to the front.
    ready: VecDeque<Task>,
    running: Vec<Slot>,
    paused: Vec<Task>,
    /// Passes whose task was paused or canceled mid-run.
    draining: Vec<Slot>,
    max_concurrency: usize,
    idle_callback: Option<IdleCallback>,
    /// Set once the idle callback fired for the current quiet period.
    idle: bool,
}

impl DispatcherState {
    fn new(max_concurrency: usize) -> Self {
        Self {
            ready: VecDeque::new(),
            running: Vec::new(),
            paused: Vec::new(),
            draining: Vec::new(),
            max_concurrency,
            idle_callback: None,
            idle: true,
        }
    }

    fn remove_ready(&mut self, id: TaskId) {
        self.ready.retain(|task| task.id() != id);
    }

    fn remove_paused(&mut self, id: TaskId) {
        self.paused.retain(|task| task.id() != id);
    }

    /// Move the running slot of `id` to `draining`.
    fn detach(&mut self, id: TaskId) -> bool {
        let Some(pos) = self.running.iter().position(|slot| slot.task.id() == id) else {
            return false;
        };
        let slot = self.running.swap_remove(pos);
        self.draining.push(slot);
        true
    }

    /// Drop the slot for this exact pass, wherever it is.
    fn release(&mut self, id: TaskId, pass: u64) -> bool {
        let matches = |slot: &Slot| slot.task.id() == id && slot.pass == pass;
        if let Some(pos) = self.running.iter().position(matches) {
            self.running.swap_remove(pos);
            return true;
        }
        if let Some(pos) = self.draining.iter().position(matches) {
            self.draining.swap_remove(pos);
            return true;
        }
        false
    }

    /// Undo the admission of a pass the executor had no room for. The task
    /// goes back to the head of the ready queue unless a pause or cancel
    /// already moved it elsewhere.
    fn requeue(&mut self, task: &Task, pass: &Pass) {
        self.release(task.id(), pass.number);
        let mut progression = task.progression();
        if pass.stop.is_cancelled() || progression.state != TaskState::Running {
            return;
        }
        progression.stop_pass();
        progression.transition(TaskState::Ready);
        drop(progression);
        self.ready.push_front(task.clone());
    }

    fn is_drained(&self) -> bool {
        self.running.is_empty() && self.draining.is_empty()
    }

    fn running_tasks(&self) -> impl Iterator<Item = &Task> {
        self.running.iter().map(|slot| &slot.task)
    }
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn Executor>,
        max_concurrency: usize,
    ) -> Result<Self, SchedulerError> {
        if max_concurrency < 1 {
            return Err(SchedulerError::InvalidMaxConcurrency(max_concurrency));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DispatcherState::new(max_concurrency)),
                executor,
            }),
        })
    }

    /// Change the admission limit and promote into any new room.
    ///
    /// Lowering the limit never preempts: running tasks finish and no
    /// promotion happens until the running set is below the new limit.
    pub fn set_max_concurrency(&self, max_concurrency: usize) -> Result<(), SchedulerError> {
        if max_concurrency < 1 {
            return Err(SchedulerError::InvalidMaxConcurrency(max_concurrency));
        }
        self.lock().max_concurrency = max_concurrency;
        debug!(max_concurrency, "max concurrency changed");
        self.promote_and_execute();
        Ok(())
    }

    pub fn max_concurrency(&self) -> usize {
        self.lock().max_concurrency
    }

    /// First task whose request id matches, searching running, then ready,
    /// then paused. A point-in-time answer, not a synchronization primitive.
    pub fn get_task(&self, request_id: &str) -> Option<Task> {
        let state = self.lock();
        state
            .running_tasks()
            .chain(state.ready.iter())
            .chain(state.paused.iter())
            .find(|task| task.request().id() == request_id)
            .cloned()
    }

    /// Cancel every ready, running and paused task.
    pub fn cancel_all(&self) {
        // Ready first, so canceling running work cannot promote them.
        let tasks: Vec<Task> = {
            let state = self.lock();
            state
                .ready
                .iter()
                .chain(state.running_tasks())
                .chain(state.paused.iter())
                .cloned()
                .collect()
        };
        for task in tasks {
            task.cancel();
        }
    }

    /// Pause every ready and running task.
    pub fn pause_all(&self) {
        let tasks: Vec<Task> = {
            let state = self.lock();
            state
                .ready
                .iter()
                .chain(state.running_tasks())
                .cloned()
                .collect()
        };
        for task in tasks {
            task.pause();
        }
    }

    /// Resume every paused task. They keep their relative order and go ahead
    /// of the tasks already waiting in the ready queue.
    pub fn resume_all(&self) {
        let resumed = {
            let mut state = self.lock();
            let paused = std::mem::take(&mut state.paused);
            for task in paused.iter().rev() {
                task.progression().transition(TaskState::Ready);
                state.ready.push_front(task.clone());
            }
            paused.len()
        };
        if resumed > 0 {
            debug!(resumed, "all paused tasks resumed");
            self.promote_and_execute();
        }
    }

    pub fn set_idle_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.lock().idle_callback = Some(Arc::new(callback));
    }

    pub(crate) fn set_idle_callback_arc(&self, callback: IdleCallback) {
        self.lock().idle_callback = Some(callback);
    }

    pub fn clear_idle_callback(&self) {
        self.lock().idle_callback = None;
    }

    pub fn ready_tasks_count(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn running_tasks_count(&self) -> usize {
        self.lock().running.len()
    }

    pub fn paused_tasks_count(&self) -> usize {
        self.lock().paused.len()
    }

    pub fn counts(&self) -> DispatcherCounts {
        let state = self.lock();
        DispatcherCounts {
            ready: state.ready.len(),
            running: state.running.len(),
            paused: state.paused.len(),
            draining: state.draining.len(),
        }
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        let state = self.lock();
        DispatcherSnapshot {
            max_concurrency: state.max_concurrency,
            ready: state.ready.iter().map(Task::snapshot).collect(),
            running: state.running_tasks().map(Task::snapshot).collect(),
            paused: state.paused.iter().map(Task::snapshot).collect(),
        }
    }

    /// Created -> Ready. False when the task was canceled before enqueue.
    pub(crate) fn enqueue(&self, task: &Task) -> bool {
        {
            let mut state = self.lock();
            let mut progression = task.progression();
            if progression.state != TaskState::Created {
                return false;
            }
            progression.transition(TaskState::Ready);
            drop(progression);
            state.ready.push_back(task.clone());
        }
        self.promote_and_execute();
        true
    }

    /// Ready | Running -> Paused.
    pub(crate) fn pause(&self, task: &Task) {
        let released = {
            let mut state = self.lock();
            let mut progression = task.progression();
            let previous = progression.state;
            if !matches!(previous, TaskState::Ready | TaskState::Running) {
                warn!(task = %task.id(), state = ?previous, "pause ignored");
                return;
            }
            progression.stop_pass();
            progression.transition(TaskState::Paused);
            drop(progression);

            let released = match previous {
                TaskState::Running => state.detach(task.id()),
                _ => {
                    state.remove_ready(task.id());
                    false
                }
            };
            state.paused.push(task.clone());
            released
        };
        debug!(task = %task.id(), checkpoint = task.checkpoint(), "task paused");
        if released {
            self.promote_and_execute();
        }
    }

    /// Paused -> Ready, at the head of the queue.
    pub(crate) fn resume(&self, task: &Task) {
        {
            let mut state = self.lock();
            let mut progression = task.progression();
            if progression.state != TaskState::Paused {
                warn!(task = %task.id(), state = ?progression.state, "resume ignored");
                return;
            }
            progression.transition(TaskState::Ready);
            drop(progression);
            state.remove_paused(task.id());
            state.ready.push_front(task.clone());
        }
        debug!(task = %task.id(), "task resumed");
        self.promote_and_execute();
    }

    /// Any non-terminal state -> Canceled. False when there was nothing to
    /// cancel.
    pub(crate) fn cancel(&self, task: &Task) -> bool {
        {
            let mut state = self.lock();
            let mut progression = task.progression();
            let previous = progression.state;
            if previous.is_terminal() {
                debug!(task = %task.id(), state = ?previous, "cancel ignored");
                return false;
            }
            progression.stop_pass();
            progression.transition(TaskState::Canceled);
            drop(progression);

            match previous {
                TaskState::Ready => state.remove_ready(task.id()),
                TaskState::Running => {
                    state.detach(task.id());
                }
                TaskState::Paused => state.remove_paused(task.id()),
                _ => {}
            }
        }
        self.promote_and_execute();
        true
    }

    /// A pass of `task` exited. Releases its slot, promotes, and fires the
    /// idle callback when nothing is left in flight.
    pub(crate) fn finished(&self, task: &Task, pass: u64) {
        {
            let mut state = self.lock();
            let released = state.release(task.id(), pass);
            assert!(released, "{} pass {pass} finished while not in flight", task.id());
        }
        self.promote(true);
    }

    /// Move ready tasks into the running set while there is room, then hand
    /// them to the executor.
    fn promote_and_execute(&self) {
        self.promote(false);
    }

    /// Promote rounds until one hands everything over. A task the executor
    /// has no room for goes back to the head of the ready queue and waits for
    /// the next finish; any other rejection fails it and frees its slot for
    /// the next round.
    fn promote(&self, after_finish: bool) {
        let mut failed_any = false;
        loop {
            let rejected: Vec<_> = self
                .admit()
                .into_iter()
                .filter_map(|(task, pass)| {
                    debug!(task = %task.id(), pass = pass.number, "task promoted");
                    let rejection = task.submit(self.shared.executor.as_ref(), &pass).err()?;
                    Some((task, pass, rejection))
                })
                .collect();
            if rejected.is_empty() {
                break;
            }

            let mut exhausted = Vec::new();
            let mut failed = false;
            for (task, pass, rejection) in rejected {
                if let RejectedExecution::Exhausted { max_workers } = rejection {
                    debug!(
                        task = %task.id(),
                        pass = pass.number,
                        max_workers,
                        "no worker free, task requeued"
                    );
                    exhausted.push((task, pass));
                    continue;
                }
                task.fail_rejected(&pass, rejection);
                self.lock().release(task.id(), pass.number);
                failed = true;
            }
            failed_any |= failed;

            if !exhausted.is_empty() {
                let mut state = self.lock();
                for (task, pass) in exhausted.iter().rev() {
                    state.requeue(task, pass);
                }
                break;
            }
            if !failed {
                break;
            }
        }

        let idle_callback = {
            let mut state = self.lock();
            if (after_finish || failed_any)
                && state.is_drained()
                && state.ready.is_empty()
                && !state.idle
            {
                state.idle = true;
                state.idle_callback.clone()
            } else {
                None
            }
        };
        if let Some(idle_callback) = idle_callback {
            debug!("dispatcher idle");
            idle_callback();
        }
    }

    /// Fill the running set from the head of the ready queue.
    fn admit(&self) -> Vec<(Task, Pass)> {
        let mut state = self.lock();
        let mut admitted = Vec::new();
        while state.running.len() < state.max_concurrency {
            let Some(task) = state.ready.pop_front() else {
                break;
            };
            let pass = task.progression().begin_pass();
            state.running.push(Slot {
                task: task.clone(),
                pass: pass.number,
            });
            admitted.push((task, pass));
        }
        if !state.running.is_empty() {
            state.idle = false;
        }
        admitted
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
