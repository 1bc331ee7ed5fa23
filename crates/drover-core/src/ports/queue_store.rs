//! QueueStore port - visibility-timeout 型キューの 5 つのプリミティブ
//!
//! ストレージ側がリースの唯一の権威。各呼び出しはアトミックである前提で、
//! この層では排他制御をしない。
//!
//! # 実装
//! - `impls::inmem_store::InMemoryQueueStore`（開発・テスト用）

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{MsgId, QueueError, QueueName, RawMessage};

/// Queue storage primitives for any number of named queues.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Lease up to `qty` visible rows, pushing their `vt` to now + `lease_seconds`.
    /// Returns fewer rows (possibly none) when not enough are visible; never waits.
    async fn read(
        &self,
        queue: &QueueName,
        lease_seconds: u32,
        qty: usize,
    ) -> Result<Vec<RawMessage>, QueueError>;

    /// Enqueue a payload, visible after `delay_seconds`.
    async fn send(
        &self,
        queue: &QueueName,
        payload: &serde_json::Value,
        delay_seconds: u32,
    ) -> Result<MsgId, QueueError>;

    /// Remove a row for good. Deleting an unknown id is a no-op.
    async fn delete(&self, queue: &QueueName, msg_id: MsgId) -> Result<(), QueueError>;

    /// Move a row to the archive table. Archiving an unknown id is a no-op.
    async fn archive(&self, queue: &QueueName, msg_id: MsgId) -> Result<(), QueueError>;

    /// Reset `vt` to now + `seconds`.
    async fn set_lease(
        &self,
        queue: &QueueName,
        msg_id: MsgId,
        seconds: u32,
    ) -> Result<(), QueueError>;
}

/// Opens a connection (a `QueueStore` handle) to the queue storage.
///
/// The scheduler and every worker unit each call this once, so units never
/// share a connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn QueueStore>, QueueError>;
}

/// A shared store acts as its own connector; every "connection" is a clone of
/// the same handle.
#[async_trait]
impl<S> Connector for Arc<S>
where
    S: QueueStore + 'static,
{
    async fn connect(&self) -> Result<Arc<dyn QueueStore>, QueueError> {
        let store: Arc<dyn QueueStore> = Arc::clone(self) as Arc<dyn QueueStore>;
        Ok(store)
    }
}
