//! Impls - ports の実装
//!
//! - **InMemoryQueueStore**: 開発・テスト用のキューストレージ
//! - **TokioWorkerPool**: tokio タスクを実行ユニットにした WorkerPool
//!
//! 本番用のストレージ実装は別クレートに置く想定（`QueueStore` を実装するだけでよい）。

pub mod inmem_store;
pub mod tokio_pool;

pub use self::inmem_store::InMemoryQueueStore;
pub use self::tokio_pool::TokioWorkerPool;
