//! RunnerBuilder - ランナーの構築とワイヤリング
//!
//! # Fail-fast
//! `build()` で設定の矛盾を全部検出して `ConfigError` を返す。起動後に
//! 「ハンドラがない」「ワーカーが接続できない」と気づくことはない。
//!
//! - キューが 1 つもない → `NoQueues`
//! - プールサイズ 0 → `ZeroPoolSize`
//! - `Connection::Live` でワーカー用 connector がない → `MissingWorkerConnector`
//! - ハンドラが解決できないキューがある → `MissingHandlers`
//! - スキーマがコンパイルできない → `InvalidSchema`
//! - 接続に失敗 → `Connect`

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::debug;

use super::config::{Connection, QueueOptions, RunnerConfig};
use super::dispatcher::{Dispatcher, TaskReport};
use super::hooks::Hooks;
use super::runner::{QueueSlot, Runner};
use super::shutdown::ShutdownSignal;
use crate::domain::{ConfigError, QueueName};
use crate::impls::TokioWorkerPool;
use crate::ports::{Connector, QueueStore};
use crate::queue::{PayloadSchema, QueueClient};
use crate::typed::{Handler, HandlerRegistry, MessageHandler, RegistryError};

/// # 使用例
/// ```ignore
/// let runner = RunnerBuilder::new(Connection::connector(store.clone()))
///     .config(RunnerConfig::from_env()?)
///     .queue_with("orders", QueueOptions::new().with_schema(order_schema))
///     .register_typed::<Order, _>("orders", OrderHandler)?
///     .hooks(Hooks::new().on_ready(|| async { tracing::info!("ready") }))
///     .build()
///     .await?;
/// runner.run().await?;
/// ```
pub struct RunnerBuilder {
    connection: Connection,
    worker_connector: Option<Arc<dyn Connector>>,
    config: RunnerConfig,
    queues: Vec<(QueueName, QueueOptions)>,
    registry: HandlerRegistry,
    require_handlers: bool,
    hooks: Hooks,
    shutdown: Option<ShutdownSignal>,
    reports: Option<mpsc::UnboundedSender<TaskReport>>,
}

impl RunnerBuilder {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            worker_connector: None,
            config: RunnerConfig::default(),
            queues: Vec::new(),
            registry: HandlerRegistry::new(),
            require_handlers: true,
            hooks: Hooks::default(),
            shutdown: None,
            reports: None,
        }
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Poll `name` with the runner's default lease and batch size.
    pub fn queue(self, name: impl Into<QueueName>) -> Self {
        self.queue_with(name, QueueOptions::default())
    }

    /// Poll `name` with its own options. Adding a queue twice replaces its
    /// options.
    pub fn queue_with(mut self, name: impl Into<QueueName>, options: QueueOptions) -> Self {
        let name = name.into();
        match self.queues.iter_mut().find(|(q, _)| *q == name) {
            Some(entry) => entry.1 = options,
            None => self.queues.push((name, options)),
        }
        self
    }

    pub fn register<H>(mut self, key: impl Into<String>, handler: H) -> Result<Self, RegistryError>
    where
        H: MessageHandler + 'static,
    {
        self.registry.register(key, handler)?;
        Ok(self)
    }

    pub fn register_typed<T, H>(
        mut self,
        key: impl Into<String>,
        handler: H,
    ) -> Result<Self, RegistryError>
    where
        T: DeserializeOwned + Send + 'static,
        H: Handler<T> + 'static,
    {
        self.registry.register_typed::<T, H>(key, handler)?;
        Ok(self)
    }

    /// Skip the startup check that every queue has a handler. Unresolved
    /// queues then fail per task with `HandlerError::NotFound`.
    pub fn allow_missing_handlers(mut self) -> Self {
        self.require_handlers = false;
        self
    }

    /// Connector worker units use to open their own connections. Required
    /// with `Connection::Live`; otherwise defaults to the main connector.
    pub fn worker_connector<C>(mut self, connector: C) -> Self
    where
        C: Connector + 'static,
    {
        self.worker_connector = Some(Arc::new(connector));
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Share an existing signal instead of creating one.
    pub fn shutdown_signal(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Publish a `TaskReport` for every executed task.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<TaskReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub async fn build(self) -> Result<Runner, ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }
        if self.config.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }

        let worker_connector = match (&self.connection, self.worker_connector) {
            (_, Some(connector)) => connector,
            (Connection::Connector(connector), None) => Arc::clone(connector),
            (Connection::Live(_), None) => return Err(ConfigError::MissingWorkerConnector),
        };

        if self.require_handlers {
            let missing: Vec<String> = self
                .queues
                .iter()
                .filter(|(q, _)| !self.registry.contains(q))
                .map(|(q, _)| q.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(ConfigError::MissingHandlers(missing));
            }
        }

        let mut schemas = Vec::with_capacity(self.queues.len());
        for (queue, options) in &self.queues {
            let schema = options
                .schema
                .as_ref()
                .map(PayloadSchema::compile)
                .transpose()
                .map_err(|source| ConfigError::InvalidSchema {
                    queue: queue.clone(),
                    source,
                })?;
            schemas.push(schema);
        }

        let store: Arc<dyn QueueStore> = match &self.connection {
            Connection::Connector(connector) => {
                connector.connect().await.map_err(ConfigError::Connect)?
            }
            Connection::Live(store) => Arc::clone(store),
        };

        let invalid_policy = self.hooks.invalid_policy();
        let slots: Vec<QueueSlot> = self
            .queues
            .into_iter()
            .zip(schemas)
            .map(|((name, options), schema)| {
                let mut client = QueueClient::new(name, Arc::clone(&store))
                    .with_invalid_policy(invalid_policy.clone());
                if let Some(schema) = schema {
                    client = client.with_schema(schema);
                }
                QueueSlot {
                    client,
                    lease_seconds: options.lease_seconds.unwrap_or(self.config.lease_seconds),
                    batch_size: options.batch_size.unwrap_or(self.config.batch_size),
                }
            })
            .collect();

        let hooks = Arc::new(self.hooks);
        let mut dispatcher = Dispatcher::new(Arc::new(self.registry), Arc::clone(&hooks));
        if let Some(tx) = self.reports {
            dispatcher = dispatcher.with_reports(tx);
        }

        let pool = TokioWorkerPool::spawn(
            self.config.pool_size,
            Arc::new(dispatcher),
            worker_connector,
        )
        .await
        .map_err(ConfigError::Connect)?;

        debug!(queues = slots.len(), pool_size = self.config.pool_size, "runner built");

        Ok(Runner::new(
            self.config,
            slots,
            Arc::new(pool),
            hooks,
            self.shutdown.unwrap_or_default(),
        ))
    }
}

impl std::fmt::Debug for RunnerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerBuilder")
            .field("connection", &self.connection)
            .field("config", &self.config)
            .field("queues", &self.queues)
            .field("handlers", &self.registry.registered_keys())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
