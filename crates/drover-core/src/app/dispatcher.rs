//! Dispatcher - ワーカー側でタスクを 1 件実行する
//!
//! # 流れ
//! 1. キュー名からハンドラを解決（完全一致 → sanitized）
//! 2. ユニット自身の接続で `LeasedMessage` を組み立て直す
//! 3. ハンドラを実行（panic も捕捉してエラー扱い）
//! 4. 失敗時: `on_handler_error` があればその戻り値を結果にする。
//!    なければ archive（既に delete/archive 済みなら何もしない）
//! 5. 成否にかかわらず `after_execute` → `TaskReport`
//!
//! 解決に失敗した場合も 4 と同じ経路を通る。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::context::WorkerContext;
use super::hooks::Hooks;
use crate::domain::{HandlerError, MsgId, QueueName, Task};
use crate::queue::LeasedMessage;
use crate::typed::HandlerRegistry;

/// What happened to one task.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The handler returned a value.
    Completed(Value),
    /// The handler failed and `on_handler_error` produced a value instead.
    Recovered(Value),
    /// The handler failed. `archived` is true when the default policy moved
    /// the message to the archive.
    Failed { error: HandlerError, archived: bool },
}

impl TaskOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Completed(v) | Self::Recovered(v) => Some(v),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug)]
pub struct TaskReport {
    pub queue: QueueName,
    pub msg_id: MsgId,
    pub unit: usize,
    pub outcome: TaskOutcome,
}

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    hooks: Arc<Hooks>,
    reports: Option<mpsc::UnboundedSender<TaskReport>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, hooks: Arc<Hooks>) -> Self {
        Self {
            registry,
            hooks,
            reports: None,
        }
    }

    /// Publish a `TaskReport` for every task this dispatcher runs.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<TaskReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Run one task to completion and return its report.
    pub async fn dispatch(&self, task: Task, ctx: &mut WorkerContext) -> TaskReport {
        let queue = task.queue.clone();
        let msg_id = task.msg_id();
        let message = LeasedMessage::new(task.raw, ctx.client(queue.clone()));

        debug!(queue = %queue, msg_id = %msg_id, unit = ctx.unit(), read_ct = message.read_ct(), "executing task");

        let outcome = match self.invoke(&message, ctx).await {
            Ok(value) => TaskOutcome::Completed(value),
            Err(err) => self.recover(err, &message).await,
        };
        ctx.record_task();

        if let Some(hook) = &self.hooks.after_execute {
            hook(message.clone(), outcome.value().cloned()).await;
        }

        TaskReport {
            queue,
            msg_id,
            unit: ctx.unit(),
            outcome,
        }
    }

    /// `dispatch`, then publish the report if a channel is attached.
    pub async fn dispatch_and_report(&self, task: Task, ctx: &mut WorkerContext) {
        let report = self.dispatch(task, ctx).await;
        if let Some(tx) = &self.reports {
            // receiver gone means nobody is listening
            let _ = tx.send(report);
        }
    }

    async fn invoke(
        &self,
        message: &LeasedMessage,
        ctx: &mut WorkerContext,
    ) -> Result<Value, HandlerError> {
        let handler = self.registry.resolve(message.queue())?;

        match AssertUnwindSafe(handler.handle(message, ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(match err.downcast::<HandlerError>() {
                Ok(handler_err) => handler_err,
                Err(source) => HandlerError::Failed {
                    queue: message.queue().clone(),
                    msg_id: message.msg_id(),
                    source,
                },
            }),
            Err(panic) => Err(HandlerError::Panicked {
                queue: message.queue().clone(),
                msg_id: message.msg_id(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    async fn recover(&self, err: HandlerError, message: &LeasedMessage) -> TaskOutcome {
        if let Some(hook) = &self.hooks.on_handler_error {
            return match hook(err, message.clone()).await {
                Ok(value) => TaskOutcome::Recovered(value),
                Err(error) => {
                    warn!(queue = %message.queue(), msg_id = %message.msg_id(), error = %error, "handler error hook gave up");
                    TaskOutcome::Failed {
                        error,
                        archived: false,
                    }
                }
            };
        }

        error!(queue = %message.queue(), msg_id = %message.msg_id(), error = %err, "handler failed");

        if message.is_resolved() {
            return TaskOutcome::Failed {
                error: err,
                archived: false,
            };
        }
        let archived = match message.archive().await {
            Ok(()) => true,
            Err(e) => {
                error!(queue = %message.queue(), msg_id = %message.msg_id(), error = %e, "failed to archive message");
                false
            }
        };
        TaskOutcome::Failed {
            error: err,
            archived,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.registry.registered_keys())
            .field("reports", &self.reports.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
