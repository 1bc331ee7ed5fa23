//! Domain identifiers (strongly-typed IDs).
//!
//! # MsgId と QueueName
//! - `MsgId` はキュー内で一意な、単調増加する行 ID（ストレージ側が採番する）
//! - `QueueName` はキューの名前。ハンドラ解決のキーにもなる
//!
//! どちらも newtype にしておくことで、`i64` や `String` と取り違えることを
//! コンパイル時に防ぎます。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a message row, scoped to its queue.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(i64);

impl MsgId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for MsgId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Name of a queue.
///
/// The raw name is kept as given. `sanitized()` yields the conventional
/// handler key used when no handler is registered under the exact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase, with every character outside `[a-z0-9_]` replaced by `_`.
    ///
    /// ```
    /// use drover_core::domain::QueueName;
    /// assert_eq!(QueueName::new("Billing.Invoices-v2").sanitized(), "billing_invoices_v2");
    /// ```
    pub fn sanitized(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for QueueName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QueueName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
