use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Row counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Rows whose `vt` has passed (readable now).
    pub available: usize,
    /// Rows under a lease (`vt` in the future).
    pub leased: usize,
    pub archived: usize,
}

impl QueueCounts {
    /// Rows still in the active queue.
    pub fn active(&self) -> usize {
        self.available + self.leased
    }
}

/// Install a fmt subscriber for binaries.
///
/// Filter comes from `RUST_LOG`, then `LOG_LEVEL`, then `info`.
/// Calling this twice is harmless; the second install is ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level)
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
