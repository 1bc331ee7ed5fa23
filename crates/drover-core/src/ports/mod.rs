//! Ports - 抽象化レイヤー
//!
//! 外部の協調者（キューストレージ、実行ユニット、時刻）へのインターフェース。
//! ランナー本体はこれらの trait だけに依存し、実装は `impls` に置く。

pub mod clock;
pub mod queue_store;
pub mod worker_pool;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::queue_store::{Connector, QueueStore};
pub use self::worker_pool::WorkerPool;
