//! drover-core
//!
//! Background-job runtime over a visibility-timeout message queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, errors）
//! - **ports**: 抽象化レイヤー（QueueStore, Connector, WorkerPool, Clock）
//! - **queue**: QueueClient / LeasedMessage / スキーマ検証
//! - **typed**: ハンドラ trait とレジストリ
//! - **app**: ランナー（builder, runner, dispatcher, shutdown, hooks）
//! - **impls**: 実装（InMemoryQueueStore, TokioWorkerPool）
//! - **observability**: tracing の初期化とキューの件数ビュー
//!
//! 配信は at-least-once。ハンドラは `delete` / `archive` のどちらかで
//! リースを解決する責任を持つ。

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{
    Connection, Hooks, QueueOptions, Runner, RunnerBuilder, RunnerConfig, ShutdownSignal,
    TaskOutcome, TaskReport, WorkerContext,
};
pub use domain::{MsgId, QueueName};
pub use queue::{LeasedMessage, QueueClient};
pub use typed::{Handler, MessageHandler};
