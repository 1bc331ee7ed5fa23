use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};

use drover_core::impls::InMemoryQueueStore;
use drover_core::observability::init_tracing;
use drover_core::{
    Connection, Handler, Hooks, LeasedMessage, QueueClient, QueueName, QueueOptions,
    RunnerBuilder, RunnerConfig, TaskOutcome, WorkerContext,
};

#[derive(Debug, Deserialize)]
struct Order {
    id: u64,
    sku: String,
    #[serde(default)]
    decline: bool,
}

struct OrderHandler;

#[async_trait]
impl Handler<Order> for OrderHandler {
    async fn handle(
        &self,
        order: Order,
        message: &LeasedMessage,
        ctx: &mut WorkerContext,
    ) -> anyhow::Result<Value> {
        if order.decline {
            anyhow::bail!("payment declined for order {}", order.id);
        }
        info!(order = order.id, sku = %order.sku, unit = ctx.unit(), "order shipped");
        message.delete().await?;
        Ok(json!({ "shipped": order.id }))
    }
}

fn order_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer" },
            "sku": { "type": "string" }
        },
        "required": ["id", "sku"]
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // (A) ストレージとキュー
    let store = Arc::new(InMemoryQueueStore::with_system_clock());
    let orders = QueueName::new("orders");
    store.create_queue(orders.clone()).await;

    // (B) ランナー（設定は DROVER_* 環境変数で上書きできる）
    let config = RunnerConfig::from_env()?.with_pool_size(2);
    let (tx, mut reports) = mpsc::unbounded_channel();
    let runner = RunnerBuilder::new(Connection::connector(store.clone()))
        .config(config)
        .queue_with("orders", QueueOptions::new().with_schema(order_schema()))
        .register_typed::<Order, _>("orders", OrderHandler)?
        .hooks(
            Hooks::new()
                .on_ready(|| async { info!("runner ready") })
                .on_invalid_message(|err, msg: LeasedMessage| async move {
                    warn!(msg_id = %msg.msg_id(), error = %err, "rejecting malformed order");
                    if let Err(e) = msg.archive().await {
                        warn!(error = %e, "archive failed");
                    }
                }),
        )
        .with_reports(tx)
        .build()
        .await?;
    let shutdown = runner.shutdown_signal();
    let handle = tokio::spawn(runner.run());

    // (C) 投入。スキーマ付きクライアントは不正な payload を送らせない
    let producer = QueueClient::new("orders", store.clone())
        .with_schema(drover_core::queue::PayloadSchema::compile(&order_schema())?);
    producer.send(&json!({"id": 1, "sku": "tea"}), 0).await?;
    producer.send(&json!({"id": 2, "sku": "cup"}), 0).await?;
    producer
        .send(&json!({"id": 3, "sku": "pot", "decline": true}), 0)
        .await?;
    if let Err(e) = producer.send(&json!({"id": "four"}), 0).await {
        info!(error = %e, "producer refused invalid order");
    }
    // a producer without the schema can still write one
    QueueClient::new("orders", store.clone())
        .send(&json!({"id": "five"}), 0)
        .await?;

    // (D) 3 件の結果を待つ（ctrl-c でも抜ける）
    let mut pending = 3;
    while pending > 0 {
        tokio::select! {
            report = reports.recv() => {
                let Some(report) = report else { break };
                match &report.outcome {
                    TaskOutcome::Failed { error, archived } => {
                        println!("msg {} failed (archived={archived}): {error}", report.msg_id);
                    }
                    outcome => {
                        println!("msg {} -> {}", report.msg_id, outcome.value().cloned().unwrap_or_default());
                    }
                }
                pending -= 1;
            }
            _ = shutdown.wait() => break,
        }
    }

    shutdown.trigger();
    handle.await??;

    let counts = store.counts(&orders).await?;
    println!(
        "orders: available={} leased={} archived={}",
        counts.available, counts.leased, counts.archived
    );
    Ok(())
}
