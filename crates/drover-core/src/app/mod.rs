//! App - アプリケーション層
//!
//! ports を組み合わせてランナーを組み立てる。
//!
//! # 主要コンポーネント
//! - **RunnerBuilder**: 設定の検証とワイヤリング
//! - **Runner**: スケジューラループ（poll → gate → submit → backoff）
//! - **Dispatcher**: ワーカー側でのハンドラ実行と失敗時のポリシー
//! - **ShutdownSignal**: 一方向のシャットダウン要求
//! - **Hooks**: ライフサイクルフック

pub mod builder;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod hooks;
pub mod runner;
pub mod shutdown;

pub use self::builder::RunnerBuilder;
pub use self::config::{Connection, QueueOptions, RunnerConfig};
pub use self::context::WorkerContext;
pub use self::dispatcher::{Dispatcher, TaskOutcome, TaskReport};
pub use self::hooks::Hooks;
pub use self::runner::Runner;
pub use self::shutdown::ShutdownSignal;
