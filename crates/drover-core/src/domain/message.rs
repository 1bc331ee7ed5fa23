//! Message records and the task envelope handed to the worker pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MsgId, QueueName};

/// A message row as returned by the queue storage.
///
/// `vt` is the visibility deadline: while it lies in the future no other
/// consumer can lease the row. Once it passes without the row being deleted
/// or archived, the row becomes readable again and `read_ct` goes up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub msg_id: MsgId,

    /// Number of times this row has been leased (including the current lease).
    pub read_ct: u32,

    pub enqueued_at: DateTime<Utc>,

    pub vt: DateTime<Utc>,

    /// Opaque until validated against the queue schema (if any).
    pub payload: serde_json::Value,
}

/// A message that has been moved to the archive table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedMessage {
    #[serde(flatten)]
    pub raw: RawMessage,
    pub archived_at: DateTime<Utc>,
}

/// QueueName + RawMessage の“運搬用”データ。
///
/// ワーカープールに渡す単位。生きたハンドルや接続は持たない（Serialize できる）。
/// ワーカー側で自分の接続に束ね直して `LeasedMessage` を作り直す。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub queue: QueueName,
    pub raw: RawMessage,
}

impl Task {
    pub fn new(queue: QueueName, raw: RawMessage) -> Self {
        Self { queue, raw }
    }

    pub fn msg_id(&self) -> MsgId {
        self.raw.msg_id
    }
}
