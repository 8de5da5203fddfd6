//! SchedulerConfig - tunables for the dispatcher and the worker pool.
//!
//! Values come from defaults, from a deserialized document, or from the
//! `BATON_*` environment variables. Unset or empty variables keep the default.

use std::env;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_MAX_CONCURRENCY: &str = "BATON_MAX_CONCURRENCY";
pub const ENV_MAX_WORKERS: &str = "BATON_MAX_WORKERS";
pub const ENV_WORKER_KEEP_ALIVE_SECS: &str = "BATON_WORKER_KEEP_ALIVE_SECS";
pub const ENV_UNIT_DELAY_MS: &str = "BATON_UNIT_DELAY_MS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrency must be at least 1, got {0}")]
    InvalidMaxConcurrency(usize),

    #[error("max_workers must be at least 1 when set")]
    InvalidMaxWorkers,

    #[error("{key}={value:?} is not a valid number")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tasks admitted to the running set at once.
    pub max_concurrency: usize,
    /// Pool bound; `None` means unbounded.
    pub max_workers: Option<usize>,
    pub worker_keep_alive_secs: u64,
    /// Sleep per unit of the built-in simulated work.
    pub unit_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            max_workers: None,
            worker_keep_alive_secs: 60,
            unit_delay_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            max_concurrency: parse_or(&lookup, ENV_MAX_CONCURRENCY, defaults.max_concurrency)?,
            max_workers: parse_opt(&lookup, ENV_MAX_WORKERS)?,
            worker_keep_alive_secs: parse_or(
                &lookup,
                ENV_WORKER_KEEP_ALIVE_SECS,
                defaults.worker_keep_alive_secs,
            )?,
            unit_delay_ms: parse_or(&lookup, ENV_UNIT_DELAY_MS, defaults.unit_delay_ms)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency < 1 {
            return Err(ConfigError::InvalidMaxConcurrency(self.max_concurrency));
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::InvalidMaxWorkers);
        }
        Ok(())
    }

    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_secs(self.worker_keep_alive_secs)
    }

    pub fn unit_delay(&self) -> Duration {
        Duration::from_millis(self.unit_delay_ms)
    }

    /// Multi-threaded runtime builder whose threads are named
    /// `baton-worker-N` and linger for `worker_keep_alive` when idle.
    pub fn runtime_builder(&self) -> tokio::runtime::Builder {
        static NEXT_THREAD: AtomicUsize = AtomicUsize::new(1);

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder
            .enable_all()
            .thread_keep_alive(self.worker_keep_alive())
            .thread_name_fn(|| {
                let n = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
                format!("baton-worker-{n}")
            });
        builder
    }
}

fn lookup_non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_opt<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    lookup_non_empty(lookup, key)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}
