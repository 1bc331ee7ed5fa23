//! Handler traits - キューごとのメッセージ処理
//!
//! # 二層構造
//! - **表層（Typed）**: `Handler<T>` - payload を `T` にデコードしてから渡す
//! - **内部（Dyn）**: `MessageHandler` - object-safe。レジストリはこちらを保持する
//!
//! ハンドラはリースの解決に責任を持つ: 成功時に `delete` か `archive` を呼ぶこと。
//! 何も呼ばずに `Ok` を返すと、リース期限後にメッセージは再配信される。

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::app::WorkerContext;
use crate::domain::HandlerError;
use crate::queue::LeasedMessage;

/// Object-safe handler. The returned value becomes the task result.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        message: &LeasedMessage,
        ctx: &mut WorkerContext,
    ) -> anyhow::Result<Value>;
}

/// Handler that receives the payload already decoded as `T`.
///
/// # 使用例
/// ```ignore
/// #[derive(Deserialize)]
/// struct Order { id: u64 }
///
/// struct OrderHandler;
///
/// #[async_trait]
/// impl Handler<Order> for OrderHandler {
///     async fn handle(&self, order: Order, msg: &LeasedMessage, _ctx: &mut WorkerContext)
///         -> anyhow::Result<Value>
///     {
///         charge(order.id).await?;
///         msg.delete().await?;
///         Ok(Value::Null)
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T>: Send + Sync
where
    T: DeserializeOwned + Send + 'static,
{
    async fn handle(
        &self,
        payload: T,
        message: &LeasedMessage,
        ctx: &mut WorkerContext,
    ) -> anyhow::Result<Value>;
}

/// `Handler<T>` を `MessageHandler` に型消去するラッパー
pub struct TypedHandler<T, H> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, H> MessageHandler for TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    async fn handle(
        &self,
        message: &LeasedMessage,
        ctx: &mut WorkerContext,
    ) -> anyhow::Result<Value> {
        let payload: T = serde_json::from_value(message.payload().clone()).map_err(|source| {
            HandlerError::Decode {
                queue: message.queue().clone(),
                msg_id: message.msg_id(),
                source,
            }
        })?;
        self.handler.handle(payload, message, ctx).await
    }
}
