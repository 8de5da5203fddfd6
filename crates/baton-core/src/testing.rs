//! Shared fixtures for the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::app::{Dispatcher, Task};
use crate::domain::{BoxError, TaskError};
use crate::impls::WorkerPool;
use crate::ports::{Callback, Executor, Work, work_fn};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Start,
    Progress(u32),
    Success,
    Failure { canceled: bool },
}

impl Event {
    fn is_terminal(&self) -> bool {
        matches!(self, Event::Success | Event::Failure { .. })
    }
}

#[derive(Default)]
struct Log {
    events: Vec<Event>,
    failure_messages: Vec<String>,
}

/// Callback that records everything it is told.
pub(crate) struct Recorder {
    log: Mutex<Log>,
    changed: watch::Sender<usize>,
    pause_at: Mutex<Option<u32>>,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Log::default()),
            changed: watch::Sender::new(0),
            pause_at: Mutex::new(None),
        })
    }

    /// Pause the task (once) from inside the progress callback for `unit`.
    pub(crate) fn pause_at(&self, unit: u32) {
        *self.pause_at.lock().unwrap() = Some(unit);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().events.clone()
    }

    pub(crate) fn progress(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Progress(unit) => Some(unit),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn failures(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| matches!(event, Event::Failure { .. }))
            .collect()
    }

    pub(crate) fn failure_messages(&self) -> Vec<String> {
        self.log.lock().unwrap().failure_messages.clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|event| pred(event)).count()
    }

    pub(crate) async fn wait_until(&self, what: &str, pred: impl Fn(&[Event]) -> bool) {
        let mut rx = self.changed.subscribe();
        let reached = tokio::time::timeout(WAIT, async {
            loop {
                if pred(&self.events()) {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(reached.is_ok(), "timed out waiting for {what}: {:?}", self.events());
    }

    pub(crate) async fn wait_terminal(&self) {
        self.wait_until("a terminal callback", |events| {
            events.iter().any(Event::is_terminal)
        })
        .await;
    }

    fn record(&self, event: Event) {
        self.log.lock().unwrap().events.push(event);
        self.changed.send_modify(|n| *n += 1);
    }
}

impl Callback for Recorder {
    fn on_start(&self, _task: &Task) {
        self.record(Event::Start);
    }

    fn on_progress_changed(&self, task: &Task) {
        let progress = task.progress();
        let pause = {
            let mut pause_at = self.pause_at.lock().unwrap();
            pause_at.take_if(|unit| *unit == progress).is_some()
        };
        if pause {
            task.pause();
        }
        self.record(Event::Progress(progress));
    }

    fn on_success(&self, _task: &Task) {
        self.record(Event::Success);
    }

    fn on_failure(&self, _task: &Task, error: TaskError) {
        self.log
            .lock()
            .unwrap()
            .failure_messages
            .push(error.to_string());
        self.record(Event::Failure {
            canceled: error.is_canceled(),
        });
    }
}

/// Work that blocks every unit until the gate is opened.
pub(crate) struct Gate {
    open: Arc<watch::Sender<bool>>,
    /// Units that reached the gate so far.
    entered: Arc<watch::Sender<usize>>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            open: Arc::new(watch::Sender::new(false)),
            entered: Arc::new(watch::Sender::new(0)),
        }
    }

    pub(crate) fn open(&self) {
        self.open.send_replace(true);
    }

    /// Wait until `units` steps have reached the gate.
    pub(crate) async fn wait_entered(&self, units: usize) {
        let mut rx = self.entered.subscribe();
        let reached = tokio::time::timeout(WAIT, rx.wait_for(|n| *n >= units))
            .await
            .map(|result| result.is_ok());
        assert_eq!(reached, Ok(true), "{} units entered the gate", *self.entered.borrow());
    }

    pub(crate) fn work(&self) -> Arc<dyn Work> {
        let open = Arc::clone(&self.open);
        let entered = Arc::clone(&self.entered);
        Arc::new(work_fn(move |_, _| {
            let mut rx = open.subscribe();
            entered.send_modify(|n| *n += 1);
            async move {
                rx.wait_for(|open| *open).await?;
                Ok::<(), BoxError>(())
            }
        }))
    }
}

/// Counts idle callback invocations.
pub(crate) struct IdleCounter {
    fired: AtomicUsize,
    changed: watch::Sender<usize>,
}

impl IdleCounter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicUsize::new(0),
            changed: watch::Sender::new(0),
        })
    }

    pub(crate) fn callback(self: &Arc<Self>) -> impl Fn() + Send + Sync + use<> {
        let counter = Arc::clone(self);
        move || {
            let fired = counter.fired.fetch_add(1, Ordering::SeqCst) + 1;
            counter.changed.send_replace(fired);
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for(&self, fired: usize) {
        let mut rx = self.changed.subscribe();
        let reached = tokio::time::timeout(WAIT, rx.wait_for(|n| *n >= fired))
            .await
            .map(|result| result.is_ok());
        assert_eq!(reached, Ok(true), "idle callback fired {} times", self.count());
    }
}

/// Work whose units complete immediately.
pub(crate) fn instant_work() -> Arc<dyn Work> {
    Arc::new(work_fn(|_, _| async {
        tokio::task::yield_now().await;
        Ok::<(), BoxError>(())
    }))
}

pub(crate) fn pool() -> Arc<dyn Executor> {
    Arc::new(WorkerPool::new(Handle::current()))
}

impl Dispatcher {
    /// Wait until no pass is running or draining.
    pub(crate) async fn wait_drained(&self) {
        let drained = tokio::time::timeout(WAIT, async {
            loop {
                let counts = self.counts();
                if counts.running == 0 && counts.draining == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "dispatcher never drained: {:?}", self.counts());
    }
}
