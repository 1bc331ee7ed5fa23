//! Typed - ハンドラ API
//!
//! - **`MessageHandler`**: object-safe。`LeasedMessage` をそのまま受け取る
//! - **`Handler<T>`**: payload を `T` にデコード済みで受け取る
//! - **`HandlerRegistry`**: キュー名 → ハンドラ

pub mod handler;
pub mod registry;

pub use self::handler::{Handler, MessageHandler, TypedHandler};
pub use self::registry::{HandlerRegistry, RegistryError};
