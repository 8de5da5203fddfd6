//! Task - a cancelable, pausable handle around one Request.
//!
//! The handle is cheap to clone; every clone refers to the same task. All
//! queue movement is delegated to the [`Dispatcher`] the task was created
//! under, which also owns the lifecycle transitions. The task itself owns the
//! execution wrapper: the unit loop, the checkpoint, and the callback calls.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, trace};

use super::dispatcher::Dispatcher;
use super::status::TaskSnapshot;
use crate::domain::{
    BoxError, MAX_PROGRESS, RejectedExecution, Request, SchedulerError, TaskError, TaskId,
    TaskState,
};
use crate::ports::{Callback, Executor, Job, Work};

/// Handle to one unit of scheduled work.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: TaskId,
    request: Request,
    work: Arc<dyn Work>,
    dispatcher: Dispatcher,
    /// Bound by `enqueue`; doubles as the "already executed" marker.
    callback: OnceLock<Arc<dyn Callback>>,
    progression: Mutex<Progression>,
}

/// Mutable part of a task.
///
/// `state` is only changed by the dispatcher (under its own lock) and by the
/// execution pass settling its outcome. `checkpoint` only advances while the
/// pass that advances it has not been told to stop.
pub(crate) struct Progression {
    pub(crate) state: TaskState,
    pub(crate) checkpoint: u32,
    started: bool,
    pass: u64,
    stop: Option<CancellationToken>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Progression {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            state: TaskState::Created,
            checkpoint: 0,
            started: false,
            pass: 0,
            stop: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn transition(&mut self, state: TaskState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Start a new execution pass and mark the task running.
    pub(crate) fn begin_pass(&mut self) -> Pass {
        self.pass += 1;
        let stop = CancellationToken::new();
        self.stop = Some(stop.clone());
        self.transition(TaskState::Running);
        Pass {
            number: self.pass,
            stop,
        }
    }

    /// Tell the current pass, if any, to stop before its next unit.
    pub(crate) fn stop_pass(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
    }
}

/// One admission of a task into the running set.
///
/// A paused task that is resumed gets a new pass; the old pass may still be
/// finishing its current unit, and its token keeps it from touching the
/// checkpoint again.
#[derive(Debug, Clone)]
pub(crate) struct Pass {
    pub(crate) number: u64,
    pub(crate) stop: CancellationToken,
}

enum Drive {
    Completed,
    Stopped,
}

impl Task {
    pub(crate) fn new(request: Request, work: Arc<dyn Work>, dispatcher: Dispatcher) -> Self {
        let task = Self {
            inner: Arc::new(TaskInner {
                id: TaskId::generate(),
                request,
                work,
                dispatcher,
                callback: OnceLock::new(),
                progression: Mutex::new(Progression::new()),
            }),
        };
        debug!(task = %task.id(), request = task.request().id(), "task created");
        task
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn state(&self) -> TaskState {
        self.progression().state
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == TaskState::Canceled
    }

    pub fn is_paused(&self) -> bool {
        self.state() == TaskState::Paused
    }

    /// Completed units, 0..=100. Always equal to [`checkpoint`](Self::checkpoint).
    pub fn progress(&self) -> u32 {
        self.checkpoint()
    }

    /// Last completed unit; a resumed task continues after it.
    pub fn checkpoint(&self) -> u32 {
        self.progression().checkpoint
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let progression = self.progression();
        TaskSnapshot {
            task_id: self.id(),
            request_id: self.request().id().to_string(),
            state: progression.state,
            progress: progression.checkpoint,
            created_at: progression.created_at,
            updated_at: progression.updated_at,
        }
    }

    /// Bind `callback` and hand the task to the dispatcher.
    ///
    /// Callable once per task. A task canceled before it was enqueued reports
    /// `TaskError::Canceled` right away instead of queueing.
    pub fn enqueue(&self, callback: Arc<dyn Callback>) -> Result<(), SchedulerError> {
        self.inner
            .callback
            .set(callback)
            .map_err(|_| SchedulerError::AlreadyExecuted { task: self.id() })?;

        debug!(task = %self.id(), request = self.request().id(), "enqueue");
        if !self.inner.dispatcher.enqueue(self) {
            self.report_failure(TaskError::Canceled);
        }
        Ok(())
    }

    /// Cancel the task wherever it is.
    ///
    /// Reports `TaskError::Canceled` synchronously when a callback is bound.
    /// No-op on a task that already reached a terminal state.
    pub fn cancel(&self) {
        if self.inner.dispatcher.cancel(self) {
            debug!(task = %self.id(), checkpoint = self.checkpoint(), "task canceled");
            self.report_failure(TaskError::Canceled);
        }
    }

    /// Move the task to the paused set. A running pass stops before its next
    /// unit and the checkpoint is kept.
    pub fn pause(&self) {
        self.inner.dispatcher.pause(self);
    }

    /// Put a paused task back at the head of the ready queue.
    pub fn resume(&self) {
        self.inner.dispatcher.resume(self);
    }

    pub(crate) fn progression(&self) -> MutexGuard<'_, Progression> {
        self.inner
            .progression
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn callback(&self) -> Option<&Arc<dyn Callback>> {
        self.inner.callback.get()
    }

    fn report_failure(&self, error: TaskError) {
        if let Some(callback) = self.callback() {
            callback.on_failure(self, error);
        }
    }

    /// Hand one pass to `executor`. An accepted pass reports itself finished
    /// to the dispatcher when its job exits; a rejected one is left to the
    /// caller.
    pub(crate) fn submit(
        &self,
        executor: &dyn Executor,
        pass: &Pass,
    ) -> Result<(), RejectedExecution> {
        let number = pass.number;
        let exiting = self.clone();
        let job = Job::new(self.clone().run(pass.clone())).on_exit(move || {
            exiting.inner.dispatcher.finished(&exiting, number);
        });
        executor.execute(job)
    }

    /// Fail a pass the executor refused, unless a pause or cancel got there
    /// first.
    pub(crate) fn fail_rejected(&self, pass: &Pass, rejected: RejectedExecution) {
        error!(task = %self.id(), pass = pass.number, error = %rejected, "executor rejected task");
        if self.settle(&pass.stop, TaskState::Failed) {
            self.report_failure(TaskError::Rejected(rejected));
        }
    }

    async fn run(self, pass: Pass) {
        let span = debug_span!(
            "task",
            task = %self.id(),
            request = self.request().id(),
            pass = pass.number
        );
        async move {
            debug!("execution pass started");

            match AssertUnwindSafe(self.drive(&pass.stop)).catch_unwind().await {
                Ok(Ok(Drive::Completed)) => {
                    if self.settle(&pass.stop, TaskState::Succeeded) {
                        debug!("task succeeded");
                        if let Some(callback) = self.callback() {
                            callback.on_success(&self);
                        }
                    }
                }
                Ok(Ok(Drive::Stopped)) => {
                    debug!(checkpoint = self.checkpoint(), "execution pass stopped");
                }
                Ok(Err(err)) => {
                    error!(error = %err, "task body failed");
                    if self.settle(&pass.stop, TaskState::Failed) {
                        self.report_failure(TaskError::Execution(err));
                    }
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(panic = %message, "task body panicked");
                    if self.settle(&pass.stop, TaskState::Failed) {
                        self.report_failure(TaskError::Panicked(message));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, stop: &CancellationToken) -> Result<Drive, BoxError> {
        if stop.is_cancelled() {
            return Ok(Drive::Stopped);
        }
        let (first, resume_from) = {
            let mut progression = self.progression();
            let first = !progression.started;
            progression.started = true;
            (first, progression.checkpoint + 1)
        };
        if first && let Some(callback) = self.callback() {
            callback.on_start(self);
        }

        for unit in resume_from..=MAX_PROGRESS {
            if stop.is_cancelled() {
                return Ok(Drive::Stopped);
            }
            self.inner.work.step(&self.inner.request, unit).await?;
            if !self.commit(unit, stop) {
                return Ok(Drive::Stopped);
            }
            trace!(progress = unit, "unit completed");
            if let Some(callback) = self.callback() {
                callback.on_progress_changed(self);
            }
        }
        Ok(Drive::Completed)
    }

    /// Record `unit` as done, unless the pass was told to stop meanwhile.
    fn commit(&self, unit: u32, stop: &CancellationToken) -> bool {
        let mut progression = self.progression();
        if stop.is_cancelled() {
            return false;
        }
        progression.checkpoint = unit;
        progression.updated_at = Utc::now();
        true
    }

    /// Move a running pass to its terminal state. False when the pass was
    /// stopped first (the pause or cancel already decided the outcome).
    fn settle(&self, stop: &CancellationToken, outcome: TaskState) -> bool {
        let mut progression = self.progression();
        if stop.is_cancelled() || progression.state != TaskState::Running {
            return false;
        }
        progression.stop = None;
        progression.transition(outcome);
        true
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progression = self.progression();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("request", &self.inner.request.id())
            .field("state", &progression.state)
            .field("checkpoint", &progression.checkpoint)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::app::Scheduler;
    use crate::ports::work_fn;
    use crate::testing::{Event, Gate, Recorder, instant_work, pool};

    fn scheduler(max_concurrency: usize) -> Scheduler {
        Scheduler::builder()
            .executor(pool())
            .max_concurrency(max_concurrency)
            .default_work(instant_work())
            .build()
            .unwrap()
    }

    fn request(id: &str) -> Request {
        Request::builder().id(id).build()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_to_completion_with_progress() {
        let scheduler = scheduler(1);
        let task = scheduler.new_task(request("a"));
        let recorder = Recorder::new();

        task.enqueue(recorder.clone()).unwrap();
        recorder.wait_terminal().await;

        let events = recorder.events();
        assert_eq!(events.first(), Some(&Event::Start));
        assert_eq!(events.last(), Some(&Event::Success));
        assert_eq!(recorder.progress(), (1..=MAX_PROGRESS).collect::<Vec<_>>());
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.progress(), MAX_PROGRESS);
    }

    #[tokio::test]
    async fn enqueue_twice_is_a_usage_error() {
        let scheduler = scheduler(1);
        let gate = Gate::new();
        let task = scheduler.new_task_with(request("a"), gate.work());

        task.enqueue(Recorder::new()).unwrap();
        let err = task.enqueue(Recorder::new()).unwrap_err();
        assert_eq!(err, SchedulerError::AlreadyExecuted { task: task.id() });

        gate.open();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pause_keeps_checkpoint_and_resume_continues() {
        let scheduler = scheduler(1);
        let task = scheduler.new_task(request("a"));
        let recorder = Recorder::new();
        recorder.pause_at(10);

        task.enqueue(recorder.clone()).unwrap();
        recorder
            .wait_until("pause at 10", |events| {
                events.contains(&Event::Progress(10))
            })
            .await;
        scheduler.dispatcher().wait_drained().await;

        assert_eq!(task.state(), TaskState::Paused);
        assert_eq!(task.checkpoint(), 10);
        assert_eq!(task.progress(), task.checkpoint());
        assert_eq!(scheduler.dispatcher().paused_tasks_count(), 1);
        assert_eq!(scheduler.dispatcher().running_tasks_count(), 0);

        task.resume();
        recorder.wait_terminal().await;

        assert_eq!(recorder.progress(), (1..=MAX_PROGRESS).collect::<Vec<_>>());
        assert_eq!(recorder.count(|e| *e == Event::Start), 1);
        assert_eq!(task.state(), TaskState::Succeeded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resume_while_old_pass_is_draining() {
        let scheduler = scheduler(1);
        let dispatcher = scheduler.dispatcher();
        let gate = Gate::new();
        let task = scheduler.new_task_with(request("a"), gate.work());
        let recorder = Recorder::new();

        task.enqueue(recorder.clone()).unwrap();
        gate.wait_entered(1).await;
        task.pause();
        let counts = dispatcher.counts();
        assert_eq!((counts.paused, counts.running, counts.draining), (1, 0, 1));

        task.resume();
        let counts = dispatcher.counts();
        assert_eq!((counts.paused, counts.running, counts.draining), (0, 1, 1));
        assert_eq!(task.state(), TaskState::Running);

        gate.open();
        recorder.wait_terminal().await;
        dispatcher.wait_drained().await;

        assert_eq!(recorder.progress(), (1..=MAX_PROGRESS).collect::<Vec<_>>());
        assert_eq!(recorder.count(|e| *e == Event::Start), 1);
        assert_eq!(recorder.count(|e| *e == Event::Success), 1);
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(dispatcher.counts(), Default::default());
    }

    #[tokio::test]
    async fn cancel_in_ready_never_starts() {
        let scheduler = scheduler(1);
        let gate = Gate::new();
        let a = scheduler.new_task_with(request("a"), gate.work());
        let b = scheduler.new_task(request("b"));
        let b_events = Recorder::new();

        a.enqueue(Recorder::new()).unwrap();
        b.enqueue(b_events.clone()).unwrap();
        assert_eq!(b.state(), TaskState::Ready);

        b.cancel();

        assert!(b.is_canceled());
        assert_eq!(b_events.events(), vec![Event::Failure { canceled: true }]);
        assert_eq!(scheduler.dispatcher().ready_tasks_count(), 0);

        gate.open();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_is_idempotent_and_ignored_after_success() {
        let scheduler = scheduler(1);
        let task = scheduler.new_task(request("a"));
        let recorder = Recorder::new();

        task.enqueue(recorder.clone()).unwrap();
        recorder.wait_terminal().await;
        task.cancel();
        task.cancel();

        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(recorder.count(|e| matches!(e, Event::Failure { .. })), 0);
    }

    #[tokio::test]
    async fn cancel_before_enqueue_reports_on_enqueue() {
        let scheduler = scheduler(1);
        let task = scheduler.new_task(request("a"));
        let recorder = Recorder::new();

        task.cancel();
        task.enqueue(recorder.clone()).unwrap();

        assert_eq!(recorder.events(), vec![Event::Failure { canceled: true }]);
        assert_eq!(scheduler.dispatcher().counts().ready, 0);
    }

    #[tokio::test]
    async fn pause_and_resume_are_idempotent() {
        let scheduler = scheduler(1);
        let gate = Gate::new();
        let a = scheduler.new_task_with(request("a"), gate.work());
        let b = scheduler.new_task(request("b"));

        b.pause();
        assert_eq!(b.state(), TaskState::Created);

        a.enqueue(Recorder::new()).unwrap();
        b.enqueue(Recorder::new()).unwrap();
        b.resume();
        assert_eq!(b.state(), TaskState::Ready);

        b.pause();
        b.pause();
        assert!(b.is_paused());
        assert_eq!(scheduler.dispatcher().paused_tasks_count(), 1);

        b.resume();
        b.resume();
        assert_eq!(b.state(), TaskState::Ready);
        assert_eq!(scheduler.dispatcher().ready_tasks_count(), 1);

        gate.open();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn body_error_is_reported_as_failure() {
        let scheduler = scheduler(1);
        let work = Arc::new(work_fn(|_, unit| async move {
            if unit == 5 {
                Err::<(), BoxError>("checksum mismatch".into())
            } else {
                Ok(())
            }
        }));
        let task = scheduler.new_task_with(request("a"), work);
        let recorder = Recorder::new();

        task.enqueue(recorder.clone()).unwrap();
        recorder.wait_terminal().await;

        assert_eq!(recorder.progress(), vec![1, 2, 3, 4]);
        assert_eq!(
            recorder.failure_messages(),
            vec!["task body failed: checksum mismatch".to_string()]
        );
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.checkpoint(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn body_panic_is_reported_as_failure() {
        let scheduler = scheduler(1);
        let steps = Arc::new(AtomicU32::new(0));
        let work = {
            let steps = Arc::clone(&steps);
            Arc::new(work_fn(move |_, unit| {
                steps.fetch_add(1, Ordering::SeqCst);
                async move {
                    if unit == 2 {
                        panic!("unit {unit} exploded");
                    }
                    Ok::<(), BoxError>(())
                }
            }))
        };
        let task = scheduler.new_task_with(request("a"), work);
        let recorder = Recorder::new();

        task.enqueue(recorder.clone()).unwrap();
        recorder.wait_terminal().await;
        scheduler.dispatcher().wait_drained().await;

        assert_eq!(
            recorder.failure_messages(),
            vec!["task body panicked: unit 2 exploded".to_string()]
        );
        assert_eq!(steps.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.dispatcher().running_tasks_count(), 0);
    }

    struct RejectAll;

    impl Executor for RejectAll {
        fn execute(&self, _job: Job) -> Result<(), RejectedExecution> {
            Err(RejectedExecution::Shutdown)
        }
    }

    #[tokio::test]
    async fn rejected_submission_fails_and_releases_slot() {
        let scheduler = Scheduler::builder()
            .executor(Arc::new(RejectAll))
            .max_concurrency(1)
            .build()
            .unwrap();
        let a = scheduler.new_task(request("a"));
        let b = scheduler.new_task(request("b"));
        let a_events = Recorder::new();
        let b_events = Recorder::new();

        a.enqueue(a_events.clone()).unwrap();
        b.enqueue(b_events.clone()).unwrap();

        assert_eq!(
            a_events.failure_messages(),
            vec!["executor rejected task: worker pool is shut down".to_string()]
        );
        assert_eq!(b_events.count(|e| matches!(e, Event::Failure { .. })), 1);
        assert_eq!(a.state(), TaskState::Failed);
        assert_eq!(scheduler.dispatcher().counts(), Default::default());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
