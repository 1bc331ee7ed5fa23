#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc};

use drover_core::{LeasedMessage, MessageHandler, RunnerConfig, TaskReport, WorkerContext};

pub fn quiet_config(pool_size: usize) -> RunnerConfig {
    RunnerConfig::new()
        .with_pool_size(pool_size)
        .with_idle_backoff(Duration::from_millis(10))
        .with_signal_handling(false)
}

pub async fn next_report(rx: &mut mpsc::UnboundedReceiver<TaskReport>) -> TaskReport {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a task report")
        .expect("report channel closed")
}

/// Deletes the message and echoes its payload.
pub struct DeleteOnSuccess;

#[async_trait]
impl MessageHandler for DeleteOnSuccess {
    async fn handle(
        &self,
        message: &LeasedMessage,
        _ctx: &mut WorkerContext,
    ) -> anyhow::Result<Value> {
        message.delete().await?;
        Ok(message.payload().clone())
    }
}

pub struct AlwaysFails;

#[async_trait]
impl MessageHandler for AlwaysFails {
    async fn handle(
        &self,
        _message: &LeasedMessage,
        _ctx: &mut WorkerContext,
    ) -> anyhow::Result<Value> {
        anyhow::bail!("card declined")
    }
}

/// Leaves the first delivery unresolved; deletes from the second on.
pub struct ResolveOnRedelivery;

#[async_trait]
impl MessageHandler for ResolveOnRedelivery {
    async fn handle(
        &self,
        message: &LeasedMessage,
        _ctx: &mut WorkerContext,
    ) -> anyhow::Result<Value> {
        if message.read_ct() >= 2 {
            message.delete().await?;
        }
        Ok(json!({ "read_ct": message.read_ct() }))
    }
}

/// Waits for a permit before deleting, and tracks peak concurrency.
#[derive(Clone)]
pub struct Gated {
    pub gate: Arc<Semaphore>,
    pub in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub started: Arc<AtomicUsize>,
}

impl Gated {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn wait_started(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.started.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("handlers did not start");
    }
}

#[async_trait]
impl MessageHandler for Gated {
    async fn handle(
        &self,
        message: &LeasedMessage,
        _ctx: &mut WorkerContext,
    ) -> anyhow::Result<Value> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);

        self.gate.acquire().await?.forget();
        message.delete().await?;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}
