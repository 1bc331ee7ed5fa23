//! Scheduler cadence, backpressure, hooks and shutdown.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc;

use common::{DeleteOnSuccess, Gated, next_report, quiet_config};
use drover_core::domain::{HookError, Task};
use drover_core::impls::InMemoryQueueStore;
use drover_core::ports::FixedClock;
use drover_core::{Connection, Hooks, QueueClient, QueueName, RunnerBuilder, TaskOutcome};

async fn store_with_orders(n: usize) -> Arc<InMemoryQueueStore> {
    let store = Arc::new(InMemoryQueueStore::with_system_clock());
    store.create_queue("orders").await;
    let client = QueueClient::new("orders", store.clone());
    for i in 0..n {
        client.send(&json!({ "id": i }), 0).await.unwrap();
    }
    store
}

#[tokio::test]
async fn in_flight_work_is_bounded_by_pool_size() {
    let store = store_with_orders(6).await;
    let gated = Gated::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runner = RunnerBuilder::new(Connection::connector(store.clone()))
        .config(quiet_config(2))
        .queue("orders")
        .register("orders", gated.clone())
        .unwrap()
        .with_reports(tx)
        .build()
        .await
        .unwrap();
    let shutdown = runner.shutdown_signal();
    let handle = tokio::spawn(runner.run());

    gated.wait_started(2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // both units busy: the scheduler stopped reading instead of leasing ahead
    assert_eq!(gated.started.load(Ordering::SeqCst), 2);
    let counts = store.counts(&QueueName::new("orders")).await.unwrap();
    assert_eq!(counts.leased, 2);
    assert_eq!(counts.available, 4);

    gated.gate.add_permits(6);
    for _ in 0..6 {
        next_report(&mut rx).await;
    }
    shutdown.trigger();
    handle.await.unwrap().unwrap();

    assert!(gated.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(store.counts(&QueueName::new("orders")).await.unwrap().active(), 0);
}

#[tokio::test]
async fn shutdown_lets_in_flight_tasks_finish_and_stops_reading() {
    let store = store_with_orders(2).await;
    let gated = Gated::new();
    let runner = RunnerBuilder::new(Connection::connector(store.clone()))
        .config(quiet_config(1))
        .queue("orders")
        .register("orders", gated.clone())
        .unwrap()
        .build()
        .await
        .unwrap();
    let shutdown = runner.shutdown_signal();
    let handle = tokio::spawn(runner.run());

    gated.wait_started(1).await;
    shutdown.trigger();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished(), "run() must wait for the in-flight task");

    gated.gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // the in-flight message was deleted; the other one was never leased
    let rows = store.rows(&QueueName::new("orders")).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].read_ct, 0);
    assert_eq!(rows[0].payload, json!({"id": 1}));
}

#[tokio::test(start_paused = true)]
async fn idle_queues_are_polled_at_the_backoff_interval() {
    let store = store_with_orders(0).await;
    let reads = Arc::new(AtomicUsize::new(0));
    let hooks = Hooks::new().before_process({
        let reads = reads.clone();
        move |_queue| {
            reads.fetch_add(1, Ordering::SeqCst);
            async {}
        }
    });
    let runner = RunnerBuilder::new(Connection::connector(store.clone()))
        .config(quiet_config(1).with_idle_backoff(Duration::from_millis(1000)))
        .queue("orders")
        .register("orders", DeleteOnSuccess)
        .unwrap()
        .hooks(hooks)
        .build()
        .await
        .unwrap();
    let shutdown = runner.shutdown_signal();
    let handle = tokio::spawn(runner.run());

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(reads.load(Ordering::SeqCst), 2);

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn busy_queue_is_drained_without_backoff() {
    let store = store_with_orders(3).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runner = RunnerBuilder::new(Connection::connector(store.clone()))
        .config(quiet_config(1).with_idle_backoff(Duration::from_millis(1000)))
        .queue("orders")
        .register("orders", DeleteOnSuccess)
        .unwrap()
        .with_reports(tx)
        .build()
        .await
        .unwrap();
    let shutdown = runner.shutdown_signal();
    let started = tokio::time::Instant::now();
    let handle = tokio::spawn(runner.run());

    for _ in 0..3 {
        next_report(&mut rx).await;
    }
    assert!(started.elapsed() < Duration::from_millis(1000));

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn vetoed_task_is_retried_after_its_lease() {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
    let store = Arc::new(InMemoryQueueStore::new(clock.clone()));
    store.create_queue("orders").await;
    let sent = QueueClient::new("orders", store.clone())
        .send(&json!({"id": 1}), 0)
        .await
        .unwrap();

    let hooks = Hooks::new().before_execute(|_queue, task: Task| async move {
        if task.raw.read_ct < 2 {
            Err(HookError::new("warming up"))
        } else {
            Ok(())
        }
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runner = RunnerBuilder::new(Connection::connector(store.clone()))
        .config(quiet_config(1).with_lease_seconds(5))
        .queue("orders")
        .register("orders", DeleteOnSuccess)
        .unwrap()
        .hooks(hooks)
        .with_reports(tx)
        .build()
        .await
        .unwrap();
    let shutdown = runner.shutdown_signal();
    let handle = tokio::spawn(runner.run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(store.counts(&QueueName::new("orders")).await.unwrap().leased, 1);

    clock.advance(chrono::Duration::seconds(6));
    let report = next_report(&mut rx).await;
    shutdown.trigger();
    handle.await.unwrap().unwrap();

    assert_eq!(report.msg_id, sent);
    assert!(matches!(report.outcome, TaskOutcome::Completed(_)));
}

#[tokio::test]
async fn read_errors_go_to_the_queue_error_hook() {
    let store = store_with_orders(1).await;
    let failures = Arc::new(AtomicUsize::new(0));
    let hooks = Hooks::new().on_error({
        let failures = failures.clone();
        move |_err, queue: QueueName| {
            assert_eq!(queue.as_str(), "missing");
            failures.fetch_add(1, Ordering::SeqCst);
            async {}
        }
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runner = RunnerBuilder::new(Connection::connector(store.clone()))
        .config(quiet_config(1))
        .queue("missing")
        .queue("orders")
        .register("missing", DeleteOnSuccess)
        .unwrap()
        .register("orders", DeleteOnSuccess)
        .unwrap()
        .hooks(hooks)
        .with_reports(tx)
        .build()
        .await
        .unwrap();
    let shutdown = runner.shutdown_signal();
    let handle = tokio::spawn(runner.run());

    let report = next_report(&mut rx).await;
    shutdown.trigger();
    handle.await.unwrap().unwrap();

    assert_eq!(report.queue, QueueName::new("orders"));
    assert!(failures.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn lifecycle_hooks_fire_once() {
    let store = store_with_orders(0).await;
    let ready = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicUsize::new(0));
    let hooks = Hooks::new()
        .on_ready({
            let ready = ready.clone();
            move || {
                ready.fetch_add(1, Ordering::SeqCst);
                async {}
            }
        })
        .on_shutdown({
            let stopped = stopped.clone();
            move || {
                stopped.fetch_add(1, Ordering::SeqCst);
                async {}
            }
        });
    let runner = RunnerBuilder::new(Connection::connector(store.clone()))
        .config(quiet_config(1))
        .queue("orders")
        .register("orders", DeleteOnSuccess)
        .unwrap()
        .hooks(hooks)
        .build()
        .await
        .unwrap();
    let shutdown = runner.shutdown_signal();
    let handle = tokio::spawn(runner.run());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(shutdown.trigger());
    assert!(!shutdown.trigger());
    handle.await.unwrap().unwrap();

    assert_eq!(ready.load(Ordering::SeqCst), 1);
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
}
