//! Errors - エラー型と分類
//!
//! 失敗ドメインごとに型を分ける:
//! - `SchemaError`: payload がスキーマに合わない（送信側は呼び出し元へ返す）
//! - `QueueError`: キューストレージとの I/O 失敗（キュー単位・サイクル単位で封じ込める）
//! - `HandlerError`: ハンドラの失敗・解決失敗（ディスパッチャで捕まえる）
//! - `ConfigError`: 起動時の設定不備（これだけが起動を止めてよい）

use thiserror::Error;

use super::{MsgId, QueueName};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("payload for queue `{queue}` failed validation: {}", .errors.join("; "))]
    Invalid {
        queue: QueueName,
        errors: Vec<String>,
    },

    #[error("schema document does not compile: {reason}")]
    InvalidSchema { reason: String },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue `{0}` does not exist")]
    NotFound(QueueName),

    #[error("queue storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("queue storage error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no handler registered for queue `{queue}`")]
    NotFound { queue: QueueName },

    #[error("message {msg_id} on `{queue}` has a payload the handler cannot decode: {source}")]
    Decode {
        queue: QueueName,
        msg_id: MsgId,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler for `{queue}` failed on message {msg_id}: {source}")]
    Failed {
        queue: QueueName,
        msg_id: MsgId,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler for `{queue}` panicked on message {msg_id}: {message}")]
    Panicked {
        queue: QueueName,
        msg_id: MsgId,
        message: String,
    },
}

/// A before-execute hook declined to submit a task this cycle.
#[derive(Debug, Error)]
#[error("task rejected before execution: {reason}")]
pub struct HookError {
    pub reason: String,
}

impl HookError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no idle execution unit")]
    Busy,

    #[error("worker pool is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no queues configured")]
    NoQueues,

    #[error("pool size must be at least 1")]
    ZeroPoolSize,

    #[error("a live connection was supplied without a worker connector; workers cannot open their own connections")]
    MissingWorkerConnector,

    #[error("no handler registered for queues: {0:?}")]
    MissingHandlers(Vec<String>),

    #[error("invalid schema for queue `{queue}`: {source}")]
    InvalidSchema {
        queue: QueueName,
        #[source]
        source: SchemaError,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },

    #[error("failed to connect to queue storage: {0}")]
    Connect(#[source] QueueError),
}

/// Errors that stop `Runner::run` itself. Configuration problems surface from
/// `RunnerBuilder::build` and read failures go to `on_error`.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Pool(#[from] PoolError),
}
