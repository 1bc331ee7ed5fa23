//! Runner - スケジューラループ
//!
//! # 1 サイクル
//! 1. シャットダウン要求があれば終了
//! 2. プールに空きユニットが出るまで待つ（バックプレッシャー）
//! 3. 全キューを同時に read（`before_process` → read）して join
//! 4. 取れたメッセージごとに `before_execute` → submit（完了は待たない）。
//!    バッチ途中でシャットダウン要求が来たら残りは submit せず、リース切れで再配信させる
//! 5. 取得 0 件なら `idle_backoff` だけ眠る。1 件以上ならすぐ次のサイクル
//!
//! read の失敗はそのキューだけ 0 件扱いにして他のキューは続行する。
//!
//! # 終了
//! ループを抜けたら `WorkerPool::drain()` で実行中のタスクを待ってから
//! `on_shutdown` を呼ぶ。実行中のハンドラはキャンセルしない。

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::config::RunnerConfig;
use super::hooks::Hooks;
use super::shutdown::ShutdownSignal;
use crate::domain::{PoolError, QueueName, RunnerError, Task};
use crate::ports::WorkerPool;
use crate::queue::{LeasedMessage, QueueClient};

/// A configured queue with its effective read options.
#[derive(Debug, Clone)]
pub(crate) struct QueueSlot {
    pub(crate) client: QueueClient,
    pub(crate) lease_seconds: u32,
    pub(crate) batch_size: usize,
}

pub struct Runner {
    config: RunnerConfig,
    queues: Vec<QueueSlot>,
    pool: Arc<dyn WorkerPool>,
    hooks: Arc<Hooks>,
    shutdown: ShutdownSignal,
}

impl Runner {
    pub(crate) fn new(
        config: RunnerConfig,
        queues: Vec<QueueSlot>,
        pool: Arc<dyn WorkerPool>,
        hooks: Arc<Hooks>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            config,
            queues,
            pool,
            hooks,
            shutdown,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn queue_names(&self) -> Vec<QueueName> {
        self.queues
            .iter()
            .map(|slot| slot.client.name().clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn slots(&self) -> &[QueueSlot] {
        &self.queues
    }

    /// A handle that stops the runner when triggered.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Poll until shutdown is requested, then drain the pool.
    pub async fn run(self) -> Result<(), RunnerError> {
        let listener = self
            .config
            .handle_signals
            .then(|| self.shutdown.listen_for_signals());

        if let Some(hook) = &self.hooks.on_ready {
            hook().await;
        }
        info!(
            queues = ?self.queue_names(),
            pool_size = self.pool.size(),
            idle_backoff_ms = self.config.idle_backoff.as_millis() as u64,
            "runner started"
        );

        let result = self.poll_until_shutdown().await;
        if let Err(e) = &result {
            warn!(error = %e, "scheduler loop stopped on error");
        }

        info!("draining worker pool");
        self.pool.drain().await;

        if let Some(hook) = &self.hooks.on_shutdown {
            hook().await;
        }
        if let Some(listener) = listener {
            listener.abort();
        }
        info!("runner stopped");
        result
    }

    async fn poll_until_shutdown(&self) -> Result<(), RunnerError> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => return Ok(()),
                _ = self.pool.wait_idle() => {}
            }
            if self.shutdown.is_shutting_down() {
                return Ok(());
            }

            let obtained = self.poll_once().await?;
            if obtained == 0 {
                tokio::select! {
                    biased;
                    _ = self.shutdown.wait() => return Ok(()),
                    _ = tokio::time::sleep(self.config.idle_backoff) => {}
                }
            }
        }
    }

    /// One poll cycle without the idle gate or backoff. Returns the number
    /// of messages obtained across all queues, vetoed ones included.
    pub async fn poll_once(&self) -> Result<usize, RunnerError> {
        let batches = join_all(self.queues.iter().map(|slot| self.read_queue(slot))).await;
        let obtained = batches.iter().map(Vec::len).sum();

        for (slot, messages) in self.queues.iter().zip(batches) {
            for message in messages {
                self.execute(slot.client.name(), message.into_task()).await?;
            }
        }
        Ok(obtained)
    }

    async fn read_queue(&self, slot: &QueueSlot) -> Vec<LeasedMessage> {
        let queue = slot.client.name();
        if let Some(hook) = &self.hooks.before_process {
            hook(queue.clone()).await;
        }

        match slot.client.read(slot.lease_seconds, slot.batch_size).await {
            Ok(messages) => messages,
            Err(err) => {
                match &self.hooks.on_error {
                    Some(hook) => hook(err, queue.clone()).await,
                    None => warn!(queue = %queue, error = %err, "read failed, skipping queue this cycle"),
                }
                Vec::new()
            }
        }
    }

    async fn execute(&self, queue: &QueueName, task: Task) -> Result<(), RunnerError> {
        if let Some(hook) = &self.hooks.before_execute
            && let Err(e) = hook(queue.clone(), task.clone()).await
        {
            debug!(queue = %queue, msg_id = %task.msg_id(), reason = %e.reason, "task skipped this cycle");
            return Ok(());
        }

        let msg_id = task.msg_id();
        // a batch can hold more messages than there are idle units
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => {}
            _ = self.pool.wait_idle() => {}
        }
        if self.shutdown.is_shutting_down() {
            debug!(queue = %queue, msg_id = %msg_id, "shutdown requested, message stays leased");
            return Ok(());
        }
        match self.pool.submit(task) {
            Ok(()) => Ok(()),
            Err(PoolError::Busy) => {
                warn!(queue = %queue, msg_id = %msg_id, "no idle unit, message will redeliver after its lease");
                Ok(())
            }
            Err(e @ PoolError::Closed) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("queues", &self.queue_names())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HookError;
    use crate::impls::InMemoryQueueStore;
    use crate::ports::QueueStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Always idle; records what the scheduler submits.
    #[derive(Default)]
    struct RecordingPool {
        submitted: Mutex<Vec<Task>>,
        drained: AtomicBool,
        /// Triggered by the first accepted submit.
        stop_on_submit: Mutex<Option<ShutdownSignal>>,
    }

    impl RecordingPool {
        fn submitted(&self) -> Vec<Task> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkerPool for RecordingPool {
        fn size(&self) -> usize {
            1
        }

        fn idle_count(&self) -> usize {
            1
        }

        async fn wait_idle(&self) {}

        fn submit(&self, task: Task) -> Result<(), PoolError> {
            if self.drained.load(Ordering::SeqCst) {
                return Err(PoolError::Closed);
            }
            self.submitted.lock().unwrap().push(task);
            if let Some(signal) = self.stop_on_submit.lock().unwrap().take() {
                signal.trigger();
            }
            Ok(())
        }

        async fn drain(&self) {
            self.drained.store(true, Ordering::SeqCst);
        }
    }

    async fn store_with(queues: &[&str]) -> Arc<InMemoryQueueStore> {
        let store = Arc::new(InMemoryQueueStore::with_system_clock());
        for q in queues {
            store.create_queue(*q).await;
        }
        store
    }

    fn runner(
        store: &Arc<InMemoryQueueStore>,
        queues: &[&str],
        pool: Arc<RecordingPool>,
        hooks: Hooks,
    ) -> Runner {
        runner_with_batch(store, queues, pool, hooks, 1)
    }

    fn runner_with_batch(
        store: &Arc<InMemoryQueueStore>,
        queues: &[&str],
        pool: Arc<RecordingPool>,
        hooks: Hooks,
        batch_size: usize,
    ) -> Runner {
        let store: Arc<dyn QueueStore> = store.clone();
        let slots = queues
            .iter()
            .map(|q| QueueSlot {
                client: QueueClient::new(*q, store.clone()),
                lease_seconds: 30,
                batch_size,
            })
            .collect();
        let config = RunnerConfig::new()
            .with_idle_backoff(Duration::from_millis(1000))
            .with_signal_handling(false);
        Runner::new(config, slots, pool, Arc::new(hooks), ShutdownSignal::new())
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(QueueName) -> futures::future::Ready<()> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = {
            let count = count.clone();
            move |_queue: QueueName| {
                count.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(())
            }
        };
        (count, hook)
    }

    #[tokio::test]
    async fn poll_once_reads_every_queue() {
        let store = store_with(&["orders", "emails"]).await;
        store.send(&QueueName::new("orders"), &json!({"id": 1}), 0).await.unwrap();
        store.send(&QueueName::new("emails"), &json!({"to": "a"}), 0).await.unwrap();

        let pool = Arc::new(RecordingPool::default());
        let runner = runner(&store, &["orders", "emails"], pool.clone(), Hooks::new());

        assert_eq!(runner.poll_once().await.unwrap(), 2);

        let mut queues: Vec<_> = pool
            .submitted()
            .into_iter()
            .map(|t| t.queue.as_str().to_string())
            .collect();
        queues.sort();
        assert_eq!(queues, ["emails", "orders"]);
    }

    #[tokio::test]
    async fn vetoed_task_stays_leased() {
        let store = store_with(&["orders"]).await;
        store.send(&QueueName::new("orders"), &json!({"id": 1}), 0).await.unwrap();

        let pool = Arc::new(RecordingPool::default());
        let hooks = Hooks::new().before_execute(|_queue, _task| async { Err(HookError::new("paused")) });
        let runner = runner(&store, &["orders"], pool.clone(), hooks);

        assert_eq!(runner.poll_once().await.unwrap(), 1);
        assert!(pool.submitted().is_empty());

        let counts = store.counts(&QueueName::new("orders")).await.unwrap();
        assert_eq!(counts.leased, 1);
        assert_eq!(counts.archived, 0);
    }

    #[tokio::test]
    async fn failing_queue_does_not_block_the_others() {
        // "missing" was never created, so every read on it fails
        let store = store_with(&["orders"]).await;
        store.send(&QueueName::new("orders"), &json!({"id": 1}), 0).await.unwrap();

        let errors = Arc::new(Mutex::new(Vec::new()));
        let hooks = Hooks::new().on_error({
            let errors = errors.clone();
            move |err, queue: QueueName| {
                errors.lock().unwrap().push((queue.to_string(), err.to_string()));
                async {}
            }
        });
        let pool = Arc::new(RecordingPool::default());
        let runner = runner(&store, &["missing", "orders"], pool.clone(), hooks);

        assert_eq!(runner.poll_once().await.unwrap(), 1);
        assert_eq!(pool.submitted().len(), 1);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "missing");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_cycles_back_off() {
        let store = store_with(&["orders"]).await;
        let (reads, hook) = counter();
        let runner = runner(
            &store,
            &["orders"],
            Arc::new(RecordingPool::default()),
            Hooks::new().before_process(hook),
        );
        let shutdown = runner.shutdown_signal();
        let handle = tokio::spawn(runner.run());

        // reads at t = 0, 1000, 2000
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(reads.load(Ordering::SeqCst), 3);

        shutdown.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn busy_queue_polls_without_backoff() {
        let store = store_with(&["orders"]).await;
        for i in 0..3 {
            store.send(&QueueName::new("orders"), &json!({"id": i}), 0).await.unwrap();
        }
        let pool = Arc::new(RecordingPool::default());
        let runner = runner(&store, &["orders"], pool.clone(), Hooks::new());
        let shutdown = runner.shutdown_signal();
        let handle = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.submitted().len(), 3);

        shutdown.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_reads_and_drains_once() {
        let store = store_with(&["orders"]).await;
        let (reads, hook) = counter();
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let hooks = Hooks::new().before_process(hook).on_shutdown({
            let shutdowns = shutdowns.clone();
            move || {
                shutdowns.fetch_add(1, Ordering::SeqCst);
                async {}
            }
        });
        let pool = Arc::new(RecordingPool::default());
        let runner = runner(&store, &["orders"], pool.clone(), hooks);
        let shutdown = runner.shutdown_signal();
        let handle = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.trigger();
        shutdown.trigger();
        handle.await.unwrap().unwrap();
        let reads_at_shutdown = reads.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(reads.load(Ordering::SeqCst), reads_at_shutdown);
        assert!(pool.drained.load(Ordering::SeqCst));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_mid_batch_leaves_the_rest_leased() {
        let store = store_with(&["orders"]).await;
        for i in 0..3 {
            store.send(&QueueName::new("orders"), &json!({"id": i}), 0).await.unwrap();
        }
        let pool = Arc::new(RecordingPool::default());
        let runner = runner_with_batch(&store, &["orders"], pool.clone(), Hooks::new(), 3);
        *pool.stop_on_submit.lock().unwrap() = Some(runner.shutdown_signal());

        assert_eq!(runner.poll_once().await.unwrap(), 3);
        assert_eq!(pool.submitted().len(), 1);

        // nothing was archived or released early; the other two redeliver after their lease
        let counts = store.counts(&QueueName::new("orders")).await.unwrap();
        assert_eq!(counts.leased, 3);
        assert_eq!(counts.available, 0);
        assert_eq!(counts.archived, 0);
    }

    #[tokio::test]
    async fn closed_pool_stops_the_loop() {
        let store = store_with(&["orders"]).await;
        store.send(&QueueName::new("orders"), &json!({"id": 1}), 0).await.unwrap();
        let pool = Arc::new(RecordingPool::default());
        pool.drain().await;

        let runner = runner(&store, &["orders"], pool, Hooks::new());
        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, RunnerError::Pool(PoolError::Closed)));
    }
}
