//! ShutdownSignal - 一方向のシャットダウン要求
//!
//! `false -> true` にだけ遷移する。複数回 trigger しても 2 回目以降は何もしない。
//! ランナー、シグナルリスナー、テストが同じ値を clone して共有する。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug)]
struct Inner {
    flag: AtomicBool,
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Request shutdown. Returns `true` only for the call that flipped the flag.
    pub fn trigger(&self) -> bool {
        let flipped = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if flipped {
            // send_replace works with no receivers alive
            self.inner.tx.send_replace(true);
        }
        flipped
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.inner.tx.subscribe();
        // the sender lives in `inner`, so this only errors if it was dropped
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Trigger on SIGINT or SIGTERM. The listener exits after the first
    /// signal, or when shutdown is requested some other way.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                name = wait_for_os_signal() => {
                    info!(signal = name, "shutdown signal received");
                    signal.trigger();
                }
                _ = signal.wait() => {}
            }
        })
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                name = ctrl_c() => name,
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler, listening for ctrl-c only");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    interrupt(tokio::signal::ctrl_c()).await
}

/// Resolves to "SIGINT" once `listener` reports ctrl-c. A listener that fails
/// never resolves, so it cannot be mistaken for a shutdown request.
async fn interrupt(listener: impl Future<Output = std::io::Result<()>>) -> &'static str {
    if let Err(e) = listener.await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
