//! Runner configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::domain::ConfigError;
use crate::ports::{Connector, QueueStore};

pub const DEFAULT_POOL_SIZE: usize = 1;
pub const DEFAULT_LEASE_SECONDS: u32 = 5;
pub const DEFAULT_BATCH_SIZE: usize = 1;
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(1000);

/// Scheduler-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Number of execution units in the worker pool.
    pub pool_size: usize,

    /// Lease applied to reads unless the queue overrides it.
    pub lease_seconds: u32,

    /// Messages requested per queue per cycle unless the queue overrides it.
    pub batch_size: usize,

    /// Pause after a cycle that obtained no messages.
    pub idle_backoff: Duration,

    /// Install SIGINT/SIGTERM listeners when the runner starts.
    pub handle_signals: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            lease_seconds: DEFAULT_LEASE_SECONDS,
            batch_size: DEFAULT_BATCH_SIZE,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            handle_signals: true,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment.
    ///
    /// - `DROVER_POOL_SIZE`
    /// - `DROVER_LEASE_SECONDS`
    /// - `DROVER_BATCH_SIZE`
    /// - `DROVER_IDLE_BACKOFF_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with variables taken from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(n) = parse_var(&lookup, "DROVER_POOL_SIZE")? {
            config.pool_size = n;
        }
        if let Some(n) = parse_var(&lookup, "DROVER_LEASE_SECONDS")? {
            config.lease_seconds = n;
        }
        if let Some(n) = parse_var(&lookup, "DROVER_BATCH_SIZE")? {
            config.batch_size = n;
        }
        if let Some(ms) = parse_var(&lookup, "DROVER_IDLE_BACKOFF_MS")? {
            config.idle_backoff = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn with_pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn with_lease_seconds(mut self, seconds: u32) -> Self {
        self.lease_seconds = seconds;
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw,
        })
}

/// Per-queue overrides. Unset fields fall back to `RunnerConfig`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueOptions {
    pub lease_seconds: Option<u32>,
    pub batch_size: Option<usize>,
    /// JSON Schema every payload on this queue must satisfy.
    pub schema: Option<Value>,
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_seconds(mut self, seconds: u32) -> Self {
        self.lease_seconds = Some(seconds);
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n.max(1));
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// How the runner reaches queue storage.
#[derive(Clone)]
pub enum Connection {
    /// Scheduler and every worker unit open their own connection.
    Connector(Arc<dyn Connector>),
    /// An already-open handle for the scheduler. Workers then need a
    /// separate connector (`RunnerBuilder::worker_connector`).
    Live(Arc<dyn QueueStore>),
}

impl Connection {
    pub fn connector<C>(connector: C) -> Self
    where
        C: Connector + 'static,
    {
        Self::Connector(Arc::new(connector))
    }

    pub fn live(store: Arc<dyn QueueStore>) -> Self {
        Self::Live(store)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connector(_) => f.write_str("Connection::Connector(..)"),
            Self::Live(_) => f.write_str("Connection::Live(..)"),
        }
    }
}
