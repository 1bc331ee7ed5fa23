//! LeasedMessage - リース中のメッセージのハンドル
//!
//! リースを終わらせる操作は `delete` / `archive` / `extend_lease` の 3 つ。
//! どれも呼ばれないまま `vt` を過ぎると、行はストレージ側で自動的に再配信可能に戻る。
//! つまりハンドラの副作用は冪等であるか、再配信と突き合わせる必要がある（at-least-once）。

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::client::QueueClient;
use crate::domain::{MsgId, QueueError, QueueName, RawMessage, Task};

/// Where this handle believes the lease stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Leased,
    /// Lease pushed out by `extend_lease`; still needs delete or archive.
    Extended,
    Deleted,
    Archived,
}

impl LeaseState {
    pub fn is_resolved(self) -> bool {
        matches!(self, LeaseState::Deleted | LeaseState::Archived)
    }
}

/// A message held under a visibility lease.
///
/// Clones share the lease state, so a hook holding a clone sees what the
/// handler did.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    raw: RawMessage,
    client: QueueClient,
    state: Arc<Mutex<LeaseState>>,
}

impl LeasedMessage {
    pub fn new(raw: RawMessage, client: QueueClient) -> Self {
        Self {
            raw,
            client,
            state: Arc::new(Mutex::new(LeaseState::Leased)),
        }
    }

    pub fn msg_id(&self) -> MsgId {
        self.raw.msg_id
    }

    pub fn queue(&self) -> &QueueName {
        self.client.name()
    }

    pub fn read_ct(&self) -> u32 {
        self.raw.read_ct
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.raw.enqueued_at
    }

    pub fn vt(&self) -> DateTime<Utc> {
        self.raw.vt
    }

    pub fn payload(&self) -> &Value {
        &self.raw.payload
    }

    pub fn raw(&self) -> &RawMessage {
        &self.raw
    }

    pub fn state(&self) -> LeaseState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_resolved(&self) -> bool {
        self.state().is_resolved()
    }

    fn set_state(&self, next: LeaseState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Drop the live client, keeping only what crosses the pool boundary.
    pub fn into_task(self) -> Task {
        Task::new(self.client.name().clone(), self.raw)
    }

    pub async fn delete(&self) -> Result<(), QueueError> {
        self.client.delete(self.raw.msg_id).await?;
        self.set_state(LeaseState::Deleted);
        Ok(())
    }

    pub async fn archive(&self) -> Result<(), QueueError> {
        self.client.archive(self.raw.msg_id).await?;
        self.set_state(LeaseState::Archived);
        Ok(())
    }

    /// Push the visibility deadline to now + `seconds`.
    pub async fn extend_lease(&self, seconds: u32) -> Result<(), QueueError> {
        self.client.extend_lease(self.raw.msg_id, seconds).await?;
        self.set_state(LeaseState::Extended);
        Ok(())
    }
}
