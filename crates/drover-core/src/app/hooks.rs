//! Hooks - ライフサイクルフック
//!
//! 全フィールドが `Option`。`None` のときは既定のポリシーになる:
//!
//! | フック               | 既定                                   |
//! |----------------------|----------------------------------------|
//! | `before_process`     | 何もしない                             |
//! | `before_execute`     | 常に submit する                       |
//! | `on_error`           | warn ログを出してそのキューは 0 件扱い |
//! | `on_invalid_message` | archive してログ                       |
//! | `on_handler_error`   | archive してエラーを報告               |
//! | `after_execute`      | 何もしない                             |
//! | `on_ready` / `on_shutdown` | 何もしない                       |
//!
//! テストでは必要なフックだけ差し替えればよい。

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::domain::{HandlerError, HookError, QueueError, QueueName, SchemaError, Task};
use crate::queue::{InvalidMessageHook, InvalidPolicy, LeasedMessage};

pub type QueueHook = Arc<dyn Fn(QueueName) -> BoxFuture<'static, ()> + Send + Sync>;
pub type BeforeExecuteHook =
    Arc<dyn Fn(QueueName, Task) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;
pub type QueueErrorHook = Arc<dyn Fn(QueueError, QueueName) -> BoxFuture<'static, ()> + Send + Sync>;
pub type HandlerErrorHook = Arc<
    dyn Fn(HandlerError, LeasedMessage) -> BoxFuture<'static, Result<Value, HandlerError>>
        + Send
        + Sync,
>;
pub type AfterExecuteHook =
    Arc<dyn Fn(LeasedMessage, Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type LifecycleHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    /// Before each queue's read, once per cycle.
    pub before_process: Option<QueueHook>,
    /// Before submitting a task; an `Err` skips it for this cycle and the
    /// message stays leased until its `vt` passes.
    pub before_execute: Option<BeforeExecuteHook>,
    /// A read failed for one queue.
    pub on_error: Option<QueueErrorHook>,
    /// A read returned a payload that fails the queue schema.
    pub on_invalid_message: Option<InvalidMessageHook>,
    /// A handler failed or could not be resolved. The returned value is the
    /// task result; the hook owns the message's disposition.
    pub on_handler_error: Option<HandlerErrorHook>,
    /// After every task, on success and failure alike.
    pub after_execute: Option<AfterExecuteHook>,
    pub on_ready: Option<LifecycleHook>,
    pub on_shutdown: Option<LifecycleHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_process<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueueName) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.before_process = Some(Arc::new(move |queue| -> BoxFuture<'static, ()> {
            Box::pin(f(queue))
        }));
        self
    }

    pub fn before_execute<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueueName, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.before_execute = Some(Arc::new(
            move |queue, task| -> BoxFuture<'static, Result<(), HookError>> {
                Box::pin(f(queue, task))
            },
        ));
        self
    }

    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueueError, QueueName) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |err, queue| -> BoxFuture<'static, ()> {
            Box::pin(f(err, queue))
        }));
        self
    }

    pub fn on_invalid_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SchemaError, LeasedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_invalid_message = Some(Arc::new(move |err, msg| -> BoxFuture<'static, ()> {
            Box::pin(f(err, msg))
        }));
        self
    }

    pub fn on_handler_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HandlerError, LeasedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.on_handler_error = Some(Arc::new(
            move |err, msg| -> BoxFuture<'static, Result<Value, HandlerError>> {
                Box::pin(f(err, msg))
            },
        ));
        self
    }

    pub fn after_execute<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(LeasedMessage, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after_execute = Some(Arc::new(move |msg, result| -> BoxFuture<'static, ()> {
            Box::pin(f(msg, result))
        }));
        self
    }

    pub fn on_ready<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_ready = Some(Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(f()) }));
        self
    }

    pub fn on_shutdown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_shutdown = Some(Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(f()) }));
        self
    }

    /// Read-time policy for schema failures on clients the runner creates.
    pub(crate) fn invalid_policy(&self) -> InvalidPolicy {
        match &self.on_invalid_message {
            Some(hook) => InvalidPolicy::Custom(Arc::clone(hook)),
            None => InvalidPolicy::Archive,
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_process", &self.before_process.is_some())
            .field("before_execute", &self.before_execute.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_invalid_message", &self.on_invalid_message.is_some())
            .field("on_handler_error", &self.on_handler_error.is_some())
            .field("after_execute", &self.after_execute.is_some())
            .field("on_ready", &self.on_ready.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .finish()
    }
}
