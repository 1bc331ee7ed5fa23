//! TokioWorkerPool - 固定数の tokio タスクを実行ユニットとして使う WorkerPool
//!
//! # 構造
//! - ユニットごとに容量 1 の mpsc チャネル。ユニットは 1 件ずつ逐次実行する
//! - 空きユニットは `IdleUnits`（キュー + Notify）で管理
//! - 各ユニットは起動時に `Connector` から自分専用の接続を開き、
//!   `WorkerContext` としてタスク間で使い回す
//!
//! # シャットダウン
//! `drain()` で送信側を全部 drop → 各ユニットは手元のタスクを終えてからループを抜ける。
//! ハンドラを途中でキャンセルすることはない。
//!
//! フック（after_execute / on_handler_error）が panic してもユニットは止まらず、
//! ログを残して空きに戻る。

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::dispatcher::panic_message;
use crate::app::{Dispatcher, WorkerContext};
use crate::domain::{PoolError, QueueError, Task};
use crate::ports::{Connector, WorkerPool};

#[derive(Debug, Default)]
struct IdleUnits {
    units: Mutex<VecDeque<usize>>,
    notify: Notify,
}

impl IdleUnits {
    fn lock(&self) -> MutexGuard<'_, VecDeque<usize>> {
        self.units.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self) -> Option<usize> {
        self.lock().pop_front()
    }

    fn release(&self, unit: usize) {
        self.lock().push_back(unit);
        self.notify.notify_waiters();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

pub struct TokioWorkerPool {
    size: usize,
    senders: Mutex<Vec<Option<mpsc::Sender<Task>>>>,
    idle: Arc<IdleUnits>,
    closed: AtomicBool,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TokioWorkerPool {
    /// Start `size` execution units, each with its own connection.
    pub async fn spawn(
        size: usize,
        dispatcher: Arc<Dispatcher>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, QueueError> {
        let idle = Arc::new(IdleUnits::default());
        let mut senders = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);

        for unit in 0..size {
            let store = connector.connect().await?;
            let ctx = WorkerContext::new(unit, store);
            let (tx, rx) = mpsc::channel(1);

            handles.push(tokio::spawn(unit_loop(
                rx,
                ctx,
                Arc::clone(&dispatcher),
                Arc::clone(&idle),
            )));
            senders.push(Some(tx));
            idle.release(unit);
        }

        info!(size, "worker pool started");

        Ok(Self {
            size,
            senders: Mutex::new(senders),
            idle,
            closed: AtomicBool::new(false),
            handles: tokio::sync::Mutex::new(handles),
        })
    }

    fn senders(&self) -> MutexGuard<'_, Vec<Option<mpsc::Sender<Task>>>> {
        self.senders.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn unit_loop(
    mut rx: mpsc::Receiver<Task>,
    mut ctx: WorkerContext,
    dispatcher: Arc<Dispatcher>,
    idle: Arc<IdleUnits>,
) {
    let unit = ctx.unit();
    while let Some(task) = rx.recv().await {
        let msg_id = task.msg_id();
        // hook panics escape the handler's own guard
        if let Err(panic) = AssertUnwindSafe(dispatcher.dispatch_and_report(task, &mut ctx))
            .catch_unwind()
            .await
        {
            error!(
                unit,
                msg_id = %msg_id,
                panic = %panic_message(panic.as_ref()),
                "task panicked outside the handler"
            );
        }
        idle.release(unit);
    }
    debug!(unit, tasks = ctx.tasks_handled(), "execution unit stopped");
}

#[async_trait]
impl WorkerPool for TokioWorkerPool {
    fn size(&self) -> usize {
        self.size
    }

    fn idle_count(&self) -> usize {
        if self.is_closed() { 0 } else { self.idle.len() }
    }

    async fn wait_idle(&self) {
        loop {
            // register before checking so a release in between is not missed
            let notified = self.idle.notify.notified();
            if self.is_closed() || self.idle.len() > 0 {
                return;
            }
            notified.await;
        }
    }

    fn submit(&self, task: Task) -> Result<(), PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let unit = self.idle.take().ok_or(PoolError::Busy)?;

        let senders = self.senders();
        let Some(tx) = senders.get(unit).and_then(Option::as_ref) else {
            return Err(PoolError::Closed);
        };
        match tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                drop(senders);
                self.idle.release(unit);
                Err(PoolError::Busy)
            }
            Err(TrySendError::Closed(_)) => {
                warn!(unit, "execution unit is gone");
                Err(PoolError::Closed)
            }
        }
    }

    async fn drain(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for tx in self.senders().iter_mut() {
            tx.take();
        }
        // wake anyone parked in wait_idle
        self.idle.notify.notify_waiters();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "execution unit terminated abnormally");
            }
        }
        info!("worker pool drained");
    }
}

impl std::fmt::Debug for TokioWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioWorkerPool")
            .field("size", &self.size)
            .field("idle", &self.idle.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
