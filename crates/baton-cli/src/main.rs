//! baton - run a batch of simulated tasks through the scheduler.
//!
//! Enqueues `--tasks` simulated tasks, optionally pauses the first one part
//! way through and cancels another, then waits until the dispatcher is idle
//! and prints what happened to each task.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use baton_core::domain::{BoxError, TaskError, TaskState};
use baton_core::{Callback, DispatcherSnapshot, Request, Scheduler, SchedulerConfig, Task};
use clap::Parser;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "baton", version, about = "Bounded-concurrency task scheduler demo")]
struct Cli {
    /// Number of tasks to enqueue.
    #[arg(long, default_value_t = 5)]
    tasks: usize,

    /// Tasks running at once.
    #[arg(long, env = "BATON_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Milliseconds per unit of simulated work.
    #[arg(long, env = "BATON_UNIT_DELAY_MS")]
    unit_delay_ms: Option<u64>,

    /// Bound on the worker pool; unbounded when unset.
    #[arg(long, env = "BATON_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Pause the first task once it reaches this progress; it is resumed
    /// when everything else is done.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    pause_first_at: Option<u32>,

    /// Cancel the task with this index right after enqueueing.
    #[arg(long)]
    cancel: Option<usize>,

    /// Print the final snapshot as JSON.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn config(&self) -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        if let Some(max_concurrency) = self.max_concurrency {
            config.max_concurrency = max_concurrency;
        }
        if let Some(unit_delay_ms) = self.unit_delay_ms {
            config.unit_delay_ms = unit_delay_ms;
        }
        if self.max_workers.is_some() {
            config.max_workers = self.max_workers;
        }
        config
    }
}

/// How a task ended, as far as its callback saw.
#[derive(Debug, Clone, Serialize)]
struct Outcome {
    request_id: String,
    state: TaskState,
    progress: u32,
    error: Option<String>,
}

#[derive(Serialize)]
struct Report {
    dispatcher: DispatcherSnapshot,
    tasks: Vec<Outcome>,
}

/// Logs lifecycle events and keeps the failure message per request.
struct Reporter {
    pause_at: Option<u32>,
    errors: Mutex<HashMap<String, String>>,
}

impl Reporter {
    fn error_for(&self, request_id: &str) -> Option<String> {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(request_id)
            .cloned()
    }
}

impl Callback for Reporter {
    fn on_start(&self, task: &Task) {
        info!(request = task.request().id(), "started");
    }

    fn on_progress_changed(&self, task: &Task) {
        let progress = task.progress();
        if self.pause_at == Some(progress) && !task.is_paused() {
            info!(request = task.request().id(), progress, "pausing");
            task.pause();
        } else if progress % 25 == 0 {
            info!(request = task.request().id(), progress, "progress");
        }
    }

    fn on_success(&self, task: &Task) {
        info!(request = task.request().id(), "succeeded");
    }

    fn on_failure(&self, task: &Task, error: TaskError) {
        if error.is_canceled() {
            info!(request = task.request().id(), progress = task.progress(), "canceled");
        } else {
            error!(request = task.request().id(), error = %error, "failed");
        }
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(task.request().id().to_string(), error.to_string());
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::from(2);
    }

    let runtime = match config.runtime_builder().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&cli, config)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every task that was not canceled succeeded.
async fn run(cli: &Cli, config: SchedulerConfig) -> Result<bool, BoxError> {
    let idle = Arc::new(Notify::new());
    let scheduler = {
        let idle = Arc::clone(&idle);
        Scheduler::builder()
            .config(config)
            .idle_callback(move || idle.notify_one())
            .build()?
    };
    let dispatcher = scheduler.dispatcher().clone();

    let first = Arc::new(Reporter {
        pause_at: cli.pause_first_at,
        errors: Mutex::new(HashMap::new()),
    });
    let rest = Arc::new(Reporter {
        pause_at: None,
        errors: Mutex::new(HashMap::new()),
    });

    let tasks: Vec<Task> = (0..cli.tasks)
        .map(|i| scheduler.new_task(Request::builder().id(format!("req-{i}")).build()))
        .collect();
    for (i, task) in tasks.iter().enumerate() {
        let reporter = if i == 0 { &first } else { &rest };
        task.enqueue(reporter.clone())?;
    }
    if let Some(index) = cli.cancel {
        match tasks.get(index) {
            Some(task) => task.cancel(),
            None => error!(index, tasks = tasks.len(), "no task to cancel"),
        }
    }

    loop {
        let counts = dispatcher.counts();
        if counts.is_idle() {
            if counts.paused == 0 {
                break;
            }
            info!(paused = counts.paused, "resuming paused tasks");
            dispatcher.resume_all();
            continue;
        }
        idle.notified().await;
    }

    let outcomes: Vec<Outcome> = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let reporter = if i == 0 { &first } else { &rest };
            let snapshot = task.snapshot();
            Outcome {
                error: reporter.error_for(&snapshot.request_id),
                request_id: snapshot.request_id,
                state: snapshot.state,
                progress: snapshot.progress,
            }
        })
        .collect();
    let ok = outcomes.iter().all(|o| o.state != TaskState::Failed);

    if cli.json {
        let report = Report {
            dispatcher: dispatcher.snapshot(),
            tasks: outcomes,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for outcome in &outcomes {
            match &outcome.error {
                Some(error) => println!(
                    "{} {:?} progress={} error={error}",
                    outcome.request_id, outcome.state, outcome.progress
                ),
                None => println!(
                    "{} {:?} progress={}",
                    outcome.request_id, outcome.state, outcome.progress
                ),
            }
        }
    }
    Ok(ok)
}
