//! Core types for the message bus runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Generational handles (EventId, QueueId) and transport ids
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for dispatchers, queues, events, transport
//! - **Timeout**: Wait bounds with no-wait / wait-forever sentinels

mod config;
mod errors;
mod ids;
mod timeout;

pub use config::{
    Config, DestroyPolicy, DispatcherConfig, EventConfig, ObservabilityConfig, QueueConfig,
    TransportConfig,
};
pub use errors::{Error, ErrorClass, Result};
pub(crate) use ids::Handle;
pub use ids::{EventId, QueueId, SubscriptionId};
pub(crate) use timeout::Deadline;
pub use timeout::Timeout;
