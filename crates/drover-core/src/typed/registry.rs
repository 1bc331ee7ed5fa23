//! HandlerRegistry - キュー名からハンドラへの対応表
//!
//! 起動時に組み立て（mutable）、実行時は `Arc` で共有して読むだけ（immutable）。
//! ロックは不要。
//!
//! # 解決順
//! 1. 登録名とキュー名の完全一致
//! 2. `QueueName::sanitized()` と登録名の一致（`billing.invoices` → `billing_invoices`）

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::handler::{Handler, MessageHandler, TypedHandler};
use crate::domain::{HandlerError, QueueName};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for queue '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<H>(&mut self, key: impl Into<String>, handler: H) -> Result<(), RegistryError>
    where
        H: MessageHandler + 'static,
    {
        self.register_arc(key, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        key: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Register a `Handler<T>`, decoding payloads into `T` before the call.
    pub fn register_typed<T, H>(
        &mut self,
        key: impl Into<String>,
        handler: H,
    ) -> Result<(), RegistryError>
    where
        T: DeserializeOwned + Send + 'static,
        H: Handler<T> + 'static,
    {
        self.register(key, TypedHandler::<T, H>::new(handler))
    }

    pub fn resolve(&self, queue: &QueueName) -> Result<Arc<dyn MessageHandler>, HandlerError> {
        self.handlers
            .get(queue.as_str())
            .or_else(|| self.handlers.get(&queue.sanitized()))
            .cloned()
            .ok_or_else(|| HandlerError::NotFound {
                queue: queue.clone(),
            })
    }

    pub fn contains(&self, queue: &QueueName) -> bool {
        self.resolve(queue).is_ok()
    }

    pub fn registered_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
