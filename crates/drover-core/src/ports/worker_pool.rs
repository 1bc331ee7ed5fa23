//! WorkerPool port - 固定サイズの並列実行ユニット
//!
//! # 契約
//! - 各ユニットは一度に 1 タスクだけを受け付け、内部では逐次実行する
//! - `wait_idle()` は空きユニットが出るまで待つ（busy-spin ではなく通知で起きる）
//! - `submit()` は待たない。空きがなければ `PoolError::Busy`
//! - `drain()` は新規受付を止め、実行中のタスクが終わるまで待つ
//!
//! # 実装
//! - `impls::tokio_pool::TokioWorkerPool`

use async_trait::async_trait;

use crate::domain::{PoolError, Task};

#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Number of execution units.
    fn size(&self) -> usize;

    /// Number of units currently waiting for work.
    fn idle_count(&self) -> usize;

    /// Resolve once at least one unit is idle.
    async fn wait_idle(&self);

    /// Hand a task to an idle unit without waiting for it to finish.
    fn submit(&self, task: Task) -> Result<(), PoolError>;

    /// Stop accepting tasks and wait for every in-flight task to finish.
    async fn drain(&self);
}
