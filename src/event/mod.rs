//! Events: a trigger bound to a callback, a closure and a queue.
//!
//! Two kinds exist:
//! - **Timer**: fires every `interval` while Active
//! - **Listener**: fires for each inbound message whose subject matches its
//!   pattern on a [`Transport`]
//!
//! An event identity moves through `Created -> Active -> Destroyed`. It is
//! reserved with [`Runtime::new_event`], bound with [`Runtime::create`] and
//! released with [`Runtime::destroy`]. Firing never runs the callback
//! directly; it enqueues an invocation on the event's queue and the callback
//! runs on whichever thread dispatches that queue.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::message::MessageValue;
use crate::runtime::Runtime;
use crate::transport::Transport;
use crate::types::{Error, EventId, QueueId, Result};

pub mod registry;
pub(crate) mod timer;

pub use registry::CallbackRegistry;

/// User callback. Runs on the dispatching thread.
pub type Callback = Arc<dyn Fn(&mut Invocation<'_>) + Send + Sync>;

/// Opaque user data retained alongside the callback.
pub type Closure = Arc<dyn Any + Send + Sync>;

/// Lifecycle state of an event identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventState {
    /// Reserved, not yet bound to a trigger.
    Created,
    /// Bound and able to fire.
    Active,
    /// Terminal.
    Destroyed,
}

/// Trigger kind of an Active event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Timer,
    Listener,
}

pub(crate) enum Trigger {
    Timer {
        interval: Duration,
    },
    Listener {
        subject: String,
        transport: Arc<dyn Transport>,
    },
}

/// Everything needed to bind an event identity.
///
/// ```ignore
/// let spec = EventSpec::timer(Duration::from_millis(50))
///     .on_queue(queue.id())
///     .callback(|inv| tracing::info!("tick {}", inv.event()));
/// runtime.create(id, spec)?;
/// ```
pub struct EventSpec {
    pub(crate) trigger: Trigger,
    pub(crate) queue: Option<QueueId>,
    pub(crate) callback: Option<Callback>,
    pub(crate) closure: Option<Closure>,
}

impl EventSpec {
    /// Periodic timer. A zero interval is rejected at create time.
    pub fn timer(interval: Duration) -> Self {
        Self::with_trigger(Trigger::Timer { interval })
    }

    /// Listener on `subject` (wildcards allowed) over `transport`.
    pub fn listener(subject: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::with_trigger(Trigger::Listener {
            subject: subject.into(),
            transport,
        })
    }

    fn with_trigger(trigger: Trigger) -> Self {
        Self {
            trigger,
            queue: None,
            callback: None,
            closure: None,
        }
    }

    /// Queue invocations are placed on. Defaults to the runtime's default queue.
    pub fn on_queue(mut self, queue: QueueId) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Attach user data, readable from the callback via [`Invocation::closure`].
    pub fn closure<T: Any + Send + Sync>(mut self, closure: T) -> Self {
        self.closure = Some(Arc::new(closure));
        self
    }

    pub fn kind(&self) -> EventKind {
        match self.trigger {
            Trigger::Timer { .. } => EventKind::Timer,
            Trigger::Listener { .. } => EventKind::Listener,
        }
    }
}

impl fmt::Debug for EventSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSpec")
            .field("kind", &self.kind())
            .field("queue", &self.queue)
            .field("has_callback", &self.callback.is_some())
            .field("has_closure", &self.closure.is_some())
            .finish()
    }
}

/// Context handed to a callback for one firing.
///
/// A listener's message belongs to the runtime and is dropped when the
/// callback returns unless it is taken with [`Invocation::detach_message`].
pub struct Invocation<'a> {
    runtime: &'a Runtime,
    event: EventId,
    queue: QueueId,
    closure: Option<&'a Closure>,
    message: Option<MessageValue>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        runtime: &'a Runtime,
        event: EventId,
        queue: QueueId,
        closure: Option<&'a Closure>,
        message: Option<MessageValue>,
    ) -> Self {
        Self {
            runtime,
            event,
            queue,
            closure,
            message,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    pub fn event(&self) -> EventId {
        self.event
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// The closure downcast to `T`, if one was attached and has that type.
    pub fn closure<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.closure.and_then(|c| c.downcast_ref::<T>())
    }

    /// Delivered message. `None` for timers.
    pub fn message(&self) -> Option<&MessageValue> {
        self.message.as_ref()
    }

    pub fn message_mut(&mut self) -> Option<&mut MessageValue> {
        self.message.as_mut()
    }

    /// Keep the delivered message past the end of the callback.
    pub fn detach_message(&mut self) -> Result<MessageValue> {
        self.message
            .as_mut()
            .ok_or_else(|| Error::not_found(format!("{} carries no message", self.event)))?
            .detach()
    }

    /// Destroy the event being invoked. Returns immediately; the current
    /// invocation finishes normally and no further invocation starts.
    pub fn destroy_self(&self) -> Result<()> {
        self.runtime.destroy(self.event)
    }
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("event", &self.event)
            .field("queue", &self.queue)
            .field("message", &self.message)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = EventSpec::timer(Duration::from_millis(5))
            .callback(|_| {})
            .closure(42u32);
        assert_eq!(spec.kind(), EventKind::Timer);
        assert!(spec.callback.is_some());
        assert!(spec.queue.is_none());

        let closure = spec.closure.unwrap();
        assert_eq!(closure.downcast_ref::<u32>(), Some(&42));
    }
}
