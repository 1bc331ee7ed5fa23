//! In-memory queue storage.
//!
//! Behaves like a visibility-timeout queue table: rows are leased by pushing
//! their `vt` forward, and a row whose `vt` passes without delete/archive is
//! readable again. All five primitives run under one lock, so each is atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;

use crate::domain::{ArchivedMessage, MsgId, QueueError, QueueName, RawMessage};
use crate::observability::QueueCounts;
use crate::ports::{Clock, QueueStore, SystemClock};

/// One queue: active rows ordered by id, plus the archive table.
#[derive(Debug, Default)]
struct QueueTable {
    next_msg_id: i64,
    rows: BTreeMap<MsgId, RawMessage>,
    archive: Vec<ArchivedMessage>,
}

impl QueueTable {
    fn allocate_msg_id(&mut self) -> MsgId {
        self.next_msg_id += 1;
        MsgId::new(self.next_msg_id)
    }
}

/// In-memory queue storage.
pub struct InMemoryQueueStore {
    state: Mutex<HashMap<QueueName, QueueTable>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Create a queue. Creating an existing queue keeps its rows.
    pub async fn create_queue(&self, queue: impl Into<QueueName>) {
        let mut state = self.state.lock().await;
        state.entry(queue.into()).or_default();
    }

    /// Archived rows of a queue, oldest first.
    pub async fn archived(&self, queue: &QueueName) -> Vec<ArchivedMessage> {
        let state = self.state.lock().await;
        state
            .get(queue)
            .map(|t| t.archive.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the active rows of a queue.
    pub async fn rows(&self, queue: &QueueName) -> Vec<RawMessage> {
        let state = self.state.lock().await;
        state
            .get(queue)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn counts(&self, queue: &QueueName) -> Result<QueueCounts, QueueError> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let table = state
            .get(queue)
            .ok_or_else(|| QueueError::NotFound(queue.clone()))?;

        let mut counts = QueueCounts {
            archived: table.archive.len(),
            ..QueueCounts::default()
        };
        for row in table.rows.values() {
            if row.vt <= now {
                counts.available += 1;
            } else {
                counts.leased += 1;
            }
        }
        Ok(counts)
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::with_system_clock()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn read(
        &self,
        queue: &QueueName,
        lease_seconds: u32,
        qty: usize,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let now = self.clock.now();
        let vt = now + Duration::seconds(i64::from(lease_seconds));

        let mut state = self.state.lock().await;
        let table = state
            .get_mut(queue)
            .ok_or_else(|| QueueError::NotFound(queue.clone()))?;

        let leased: Vec<RawMessage> = table
            .rows
            .values_mut()
            .filter(|row| row.vt <= now)
            .take(qty)
            .map(|row| {
                row.vt = vt;
                row.read_ct += 1;
                row.clone()
            })
            .collect();
        Ok(leased)
    }

    async fn send(
        &self,
        queue: &QueueName,
        payload: &serde_json::Value,
        delay_seconds: u32,
    ) -> Result<MsgId, QueueError> {
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let table = state
            .get_mut(queue)
            .ok_or_else(|| QueueError::NotFound(queue.clone()))?;

        let msg_id = table.allocate_msg_id();
        table.rows.insert(
            msg_id,
            RawMessage {
                msg_id,
                read_ct: 0,
                enqueued_at: now,
                vt: now + Duration::seconds(i64::from(delay_seconds)),
                payload: payload.clone(),
            },
        );
        Ok(msg_id)
    }

    async fn delete(&self, queue: &QueueName, msg_id: MsgId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let table = state
            .get_mut(queue)
            .ok_or_else(|| QueueError::NotFound(queue.clone()))?;
        table.rows.remove(&msg_id);
        Ok(())
    }

    async fn archive(&self, queue: &QueueName, msg_id: MsgId) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let table = state
            .get_mut(queue)
            .ok_or_else(|| QueueError::NotFound(queue.clone()))?;

        if let Some(raw) = table.rows.remove(&msg_id) {
            table.archive.push(ArchivedMessage {
                raw,
                archived_at: now,
            });
        }
        Ok(())
    }

    async fn set_lease(
        &self,
        queue: &QueueName,
        msg_id: MsgId,
        seconds: u32,
    ) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let table = state
            .get_mut(queue)
            .ok_or_else(|| QueueError::NotFound(queue.clone()))?;

        if let Some(row) = table.rows.get_mut(&msg_id) {
            row.vt = now + Duration::seconds(i64::from(seconds));
        }
        Ok(())
    }
}
