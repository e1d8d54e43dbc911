//! # msgbus-core - Publish/Subscribe Client Runtime Core
//!
//! Client-side core of a subject-based message bus:
//! - Typed, ordered, named-field messages with exact coercion semantics
//! - A binary codec for handing messages to a transport
//! - Timers and subject listeners that fire onto FIFO event queues
//! - Dispatch on the caller's thread or on owned dispatcher threads
//! - A callback registry that keeps callbacks alive while they may still run
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────── Runtime ───────────────────────┐
//!   Transport ──► │ ListenerSink ─┐                                        │
//!   (bytes)       │               ├─► EventQueue ─► dispatch() ─► Callback │
//!                 │ TimerService ─┘      (FIFO)      Dispatcher   Registry │
//!                 └────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is owned by a [`Runtime`] session passed explicitly to callbacks.
//! Handles ([`EventId`], [`QueueId`]) are generational and minted only by the
//! runtime, so a stale handle is always a checked error.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod event;
pub mod message;
pub mod queue;
pub mod runtime;
pub mod subject;
pub mod transport;
pub mod types;

// Internal utilities
pub mod observability;

pub use event::{EventKind, EventSpec, EventState, Invocation};
pub use message::{DataType, DateTime, Defaulted, FieldKey, FieldValue, MessageField, MessageValue};
pub use queue::{
    Dispatcher, DispatcherOptions, EventQueue, LimitPolicy, QueueLimits, QueueOptions, QueueStats,
};
pub use runtime::Runtime;
pub use subject::Subject;
pub use transport::{InboundSink, IntraProcessTransport, Transport};
pub use types::{Config, Error, ErrorClass, EventId, QueueId, Result, SubscriptionId, Timeout};
