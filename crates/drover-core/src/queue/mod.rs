//! Queue client layer: typed façade, lease handle, and payload validation.

pub mod client;
pub mod leased;
pub mod validation;

pub use client::{InvalidMessageHook, InvalidPolicy, QueueClient};
pub use leased::{LeaseState, LeasedMessage};
pub use validation::PayloadSchema;
