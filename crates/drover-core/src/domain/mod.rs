//! Domain model (IDs, message records, errors).

pub mod errors;
pub mod ids;
pub mod message;

pub use errors::{
    ConfigError, HandlerError, HookError, PoolError, QueueError, RunnerError, SchemaError,
};
pub use ids::{MsgId, QueueName};
pub use message::{ArchivedMessage, RawMessage, Task};
