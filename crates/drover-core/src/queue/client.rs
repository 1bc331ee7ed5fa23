//! QueueClient - 1 つの名前付きキューに対する型付きファサード
//!
//! # 検証の非対称性
//! - send: スキーマ違反は即座に `QueueError::Schema` で呼び出し元へ返す（enqueue しない）
//! - read: スキーマ違反の行はワーカーに渡さない。`InvalidPolicy` に従って処理し、
//!   戻り値からは除外する。ポリシーが `Raise` の場合だけ read 自体が失敗する
//!
//! 送信側（producer）と受信側（consumer）で失敗ドメインが違うため、あえて揃えていない。

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{error, warn};

use super::leased::LeasedMessage;
use super::validation::PayloadSchema;
use crate::domain::{MsgId, QueueError, QueueName, SchemaError};
use crate::ports::QueueStore;

/// Called with the validation error and the (still leased) message.
pub type InvalidMessageHook =
    Arc<dyn Fn(SchemaError, LeasedMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// What `read` does with a row that fails the schema.
#[derive(Clone, Default)]
pub enum InvalidPolicy {
    /// Fail the whole read with `QueueError::Schema`.
    #[default]
    Raise,
    /// Archive the row and log it.
    Archive,
    /// Hand the row to a custom hook, which owns its disposition.
    Custom(InvalidMessageHook),
}

impl InvalidPolicy {
    pub fn custom<F, Fut>(f: F) -> Self
    where
        F: Fn(SchemaError, LeasedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Custom(Arc::new(move |err, msg| -> BoxFuture<'static, ()> {
            Box::pin(f(err, msg))
        }))
    }
}

impl fmt::Debug for InvalidPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raise => f.write_str("Raise"),
            Self::Archive => f.write_str("Archive"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Clone)]
pub struct QueueClient {
    name: QueueName,
    store: Arc<dyn QueueStore>,
    schema: Option<PayloadSchema>,
    invalid_policy: InvalidPolicy,
}

impl QueueClient {
    pub fn new(name: impl Into<QueueName>, store: Arc<dyn QueueStore>) -> Self {
        Self {
            name: name.into(),
            store,
            schema: None,
            invalid_policy: InvalidPolicy::default(),
        }
    }

    pub fn with_schema(mut self, schema: PayloadSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_invalid_policy(mut self, policy: InvalidPolicy) -> Self {
        self.invalid_policy = policy;
        self
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn schema(&self) -> Option<&PayloadSchema> {
        self.schema.as_ref()
    }

    /// Lease up to `qty` messages for `lease_seconds`.
    ///
    /// Rows failing the schema are disposed of per the invalid policy and
    /// left out of the result.
    pub async fn read(
        &self,
        lease_seconds: u32,
        qty: usize,
    ) -> Result<Vec<LeasedMessage>, QueueError> {
        let rows = self.store.read(&self.name, lease_seconds, qty).await?;

        let mut leased = Vec::with_capacity(rows.len());
        for raw in rows {
            let message = LeasedMessage::new(raw, self.clone());
            let Some(schema) = &self.schema else {
                leased.push(message);
                continue;
            };
            match schema.validate(&self.name, message.payload()) {
                Ok(()) => leased.push(message),
                Err(err) => self.dispose_invalid(err, message).await?,
            }
        }
        Ok(leased)
    }

    async fn dispose_invalid(
        &self,
        err: SchemaError,
        message: LeasedMessage,
    ) -> Result<(), QueueError> {
        match &self.invalid_policy {
            InvalidPolicy::Raise => Err(err.into()),
            InvalidPolicy::Archive => {
                warn!(
                    queue = %self.name,
                    msg_id = %message.msg_id(),
                    error = %err,
                    "archiving invalid message"
                );
                if let Err(e) = message.archive().await {
                    error!(
                        queue = %self.name,
                        msg_id = %message.msg_id(),
                        error = %e,
                        "failed to archive invalid message"
                    );
                }
                Ok(())
            }
            InvalidPolicy::Custom(hook) => {
                hook(err, message).await;
                Ok(())
            }
        }
    }

    /// Validate (if a schema is set) and enqueue. Nothing is written on a
    /// schema failure.
    pub async fn send(&self, payload: &Value, delay_seconds: u32) -> Result<MsgId, QueueError> {
        if let Some(schema) = &self.schema {
            schema.validate(&self.name, payload)?;
        }
        self.store.send(&self.name, payload, delay_seconds).await
    }

    pub async fn delete(&self, msg_id: MsgId) -> Result<(), QueueError> {
        self.store.delete(&self.name, msg_id).await
    }

    pub async fn archive(&self, msg_id: MsgId) -> Result<(), QueueError> {
        self.store.archive(&self.name, msg_id).await
    }

    pub async fn extend_lease(&self, msg_id: MsgId, seconds: u32) -> Result<(), QueueError> {
        self.store.set_lease(&self.name, msg_id, seconds).await
    }
}

impl fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueClient")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("invalid_policy", &self.invalid_policy)
            .finish_non_exhaustive()
    }
}
