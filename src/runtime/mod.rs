//! Runtime session.
//!
//! [`Runtime`] is the context object everything else hangs off: it owns the
//! queue and event arenas, the [`CallbackRegistry`], the timer thread and the
//! reserved default queue. It is cheap to clone and is passed explicitly to
//! callbacks through [`Invocation`](crate::event::Invocation). The only
//! process-global state is the counter that numbers sessions, so handles from
//! one runtime never resolve in another.
//!
//! Lock order, outermost first: events, then queues / registry / timers /
//! individual queue state. Transports are never called with the events lock
//! held.

use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use crate::event::timer::{TimerService, TimerSink};
use crate::event::{CallbackRegistry, Invocation};
use crate::queue::{Dispatcher, DispatcherOptions, EventQueue, PendingEvent, QueueOptions};
use crate::types::{Config, Error, EventId, QueueId, Result};

mod arena;
mod events;

use arena::Arena;
use events::EventRecord;

/// Name given to the reserved default queue.
pub const DEFAULT_QUEUE_NAME: &str = "default";

const TIMER_THREAD_NAME: &str = "msgbus-timer";

static NEXT_SESSION: AtomicU32 = AtomicU32::new(1);

pub(crate) struct RuntimeInner {
    session: u32,
    config: Config,
    events: Mutex<Arena<EventId, EventRecord>>,
    queues: RwLock<Arena<QueueId, EventQueue>>,
    registry: CallbackRegistry,
    timers: Arc<TimerService>,
    default_queue: EventQueue,
    closed: AtomicBool,
}

impl RuntimeInner {
    fn queue_handle(&self, id: QueueId) -> Option<EventQueue> {
        self.queues.read().get(id).cloned()
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.timers.signal_stop();
        for (_, record) in self.events.get_mut().iter() {
            record.unsubscribe();
        }
        for (_, queue) in self.queues.get_mut().iter() {
            queue.shut_down();
        }
    }
}

/// Handle to an open runtime session.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Open a session: starts the timer thread and creates the default queue.
    pub fn open(config: Config) -> Result<Self> {
        let session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let mut queues = Arena::new(session);
            let default_queue = EventQueue::new(
                queues.next_handle(),
                true,
                QueueOptions::new().with_name(DEFAULT_QUEUE_NAME),
                &config.queue,
                weak.clone(),
            );
            queues.insert(default_queue.clone());

            RuntimeInner {
                session,
                config,
                events: Mutex::new(Arena::new(session)),
                queues: RwLock::new(queues),
                registry: CallbackRegistry::new(),
                timers: Arc::new(TimerService::new()),
                default_queue,
                closed: AtomicBool::new(false),
            }
        });

        let sink: Weak<dyn TimerSink> = Arc::downgrade(&inner) as Weak<dyn TimerSink>;
        inner.timers.start(sink, TIMER_THREAD_NAME)?;

        info!(
            "runtime {} opened (destroy_policy={:?}, idle_timeout={:?})",
            inner.session,
            inner.config.events.destroy_policy, inner.config.dispatcher.idle_timeout
        );
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Callback table of this session.
    pub fn registry(&self) -> &CallbackRegistry {
        &self.inner.registry
    }

    /// Destroy every event and queue and stop the timer thread.
    ///
    /// Later operations fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::closed("runtime already closed"));
        }

        let events = self.inner.events.lock().handles();
        for id in &events {
            if let Err(e) = self.release(*id) {
                debug!("close: {} already released: {}", id, e);
            }
        }

        let queues: Vec<EventQueue> = {
            let mut arena = self.inner.queues.write();
            let ids = arena.handles();
            ids.into_iter().filter_map(|id| arena.remove(id)).collect()
        };
        for queue in &queues {
            queue.shut_down();
        }

        self.inner.timers.stop();
        info!(
            "runtime closed ({} events, {} queues released)",
            events.len(),
            queues.len()
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed("runtime is closed"));
        }
        Ok(())
    }

    // =========================================================================
    // Queues
    // =========================================================================

    /// The reserved default queue. Cannot be destroyed or limited.
    pub fn default_queue(&self) -> EventQueue {
        self.inner.default_queue.clone()
    }

    pub fn create_queue(&self, options: QueueOptions) -> Result<EventQueue> {
        self.ensure_open()?;
        if let Some(limits) = options.limits {
            crate::queue::QueueLimits::new(limits.policy, limits.max_events, limits.discard_amount)?;
        }

        let mut queues = self.inner.queues.write();
        let queue = EventQueue::new(
            queues.next_handle(),
            false,
            options,
            &self.inner.config.queue,
            Arc::downgrade(&self.inner),
        );
        queues.insert(queue.clone());
        debug!("created {}", queue.id());
        Ok(queue)
    }

    pub fn queue(&self, id: QueueId) -> Result<EventQueue> {
        self.ensure_open()?;
        self.inner
            .queue_handle(id)
            .ok_or_else(|| Error::invalid_queue(format!("{} does not exist", id)))
    }

    /// Number of live queues, including the default queue.
    pub fn queue_count(&self) -> usize {
        self.inner.queues.read().len()
    }

    /// Destroy a queue and every event bound to it. Pending invocations are
    /// discarded.
    pub fn destroy_queue(&self, id: QueueId) -> Result<()> {
        let queue = self.queue(id)?;
        if queue.is_default() {
            return Err(Error::invalid_queue("the default queue cannot be destroyed"));
        }
        let dispatchers = queue.dispatcher_count();
        if dispatchers > 0 {
            return Err(Error::resource_in_use(format!(
                "{} has {} bound dispatcher(s)",
                id, dispatchers
            )));
        }

        self.inner.queues.write().remove(id);
        let dropped = queue.shut_down();

        let bound = self.inner.events.lock().handles_on_queue(id);
        for event in &bound {
            if let Err(e) = self.release(*event) {
                debug!("destroy_queue: {} already released: {}", event, e);
            }
        }

        debug!(
            "destroyed {} ({} pending dropped, {} events destroyed)",
            id,
            dropped,
            bound.len()
        );
        Ok(())
    }

    /// Start a background thread draining `queue`.
    pub fn create_dispatcher(&self, queue: QueueId, options: DispatcherOptions) -> Result<Dispatcher> {
        let queue = self.queue(queue)?;
        Dispatcher::spawn(queue, options, &self.inner.config.dispatcher)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Run one pending invocation. Returns `false` when the event was
    /// destroyed after the invocation was queued.
    pub(crate) fn invoke(&self, queue: QueueId, pending: PendingEvent) -> Result<bool> {
        let Some(entry) = self.inner.registry.lookup(pending.event) else {
            debug!("skipping stale invocation of {}", pending.event);
            return Ok(false);
        };
        let Some(_flight) = entry.begin() else {
            debug!("skipping invocation of retired {}", pending.event);
            return Ok(false);
        };

        let mut invocation = Invocation::new(
            self,
            entry.event,
            queue,
            entry.closure.as_ref(),
            pending.message,
        );
        let outcome = catch_unwind(AssertUnwindSafe(|| (entry.callback)(&mut invocation)));
        drop(invocation);

        if let Err(payload) = outcome {
            warn!(
                "callback for {} panicked: {}",
                entry.event,
                extract_panic_message(&payload)
            );
        }
        Ok(true)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("session", &self.inner.session)
            .field("closed", &self.is_closed())
            .field("events", &self.inner.events.lock().len())
            .field("queues", &self.inner.queues.read().len())
            .field("registry", &self.inner.registry.len())
            .finish()
    }
}

fn extract_panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{LimitPolicy, QueueLimits};
    use std::time::Duration;

    fn runtime() -> Runtime {
        Runtime::open(Config::default()).unwrap()
    }

    #[test]
    fn test_default_queue_is_protected() {
        let rt = runtime();
        let default = rt.default_queue();
        assert!(default.is_default());
        assert_eq!(default.name().unwrap().as_deref(), Some(DEFAULT_QUEUE_NAME));

        let err = rt.destroy_queue(default.id()).unwrap_err();
        assert_eq!(err.code(), "INVALID_QUEUE");
        let err = default
            .set_limit_policy(LimitPolicy::DiscardNew, 1, 0)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_QUEUE");
        rt.close().unwrap();
    }

    #[test]
    fn test_queue_lifecycle() {
        let rt = runtime();
        let queue = rt
            .create_queue(QueueOptions::new().with_name("work").with_priority(5))
            .unwrap();
        assert_eq!(rt.queue_count(), 2);
        assert_eq!(queue.priority().unwrap(), 5);

        rt.destroy_queue(queue.id()).unwrap();
        assert!(!queue.is_valid());
        assert_eq!(rt.queue(queue.id()).unwrap_err().code(), "INVALID_QUEUE");
        assert_eq!(rt.destroy_queue(queue.id()).unwrap_err().code(), "INVALID_QUEUE");
        rt.close().unwrap();
    }

    #[test]
    fn test_queue_handles_are_scoped_to_their_runtime() {
        let rt1 = runtime();
        let rt2 = runtime();
        let q1 = rt1.create_queue(QueueOptions::new()).unwrap();
        let q2 = rt2.create_queue(QueueOptions::new()).unwrap();
        assert_ne!(q1.id(), q2.id());
        assert_ne!(rt1.default_queue().id(), rt2.default_queue().id());

        assert_eq!(rt2.queue(q1.id()).unwrap_err().code(), "INVALID_QUEUE");
        assert_eq!(rt2.destroy_queue(q1.id()).unwrap_err().code(), "INVALID_QUEUE");
        assert!(q2.is_valid());
        assert_eq!(rt2.queue_count(), 2);

        rt1.close().unwrap();
        rt2.close().unwrap();
    }

    #[test]
    fn test_create_queue_rejects_bad_limits() {
        let rt = runtime();
        let limits = QueueLimits {
            policy: LimitPolicy::DiscardFirst,
            max_events: 2,
            discard_amount: 5,
        };
        let err = rt
            .create_queue(QueueOptions::new().with_limits(limits))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        rt.close().unwrap();
    }

    #[test]
    fn test_close_is_terminal() {
        let rt = runtime();
        let queue = rt.create_queue(QueueOptions::new()).unwrap();
        rt.close().unwrap();

        assert!(rt.is_closed());
        assert_eq!(rt.close().unwrap_err().code(), "CLOSED");
        assert_eq!(rt.new_event().unwrap_err().code(), "CLOSED");
        assert_eq!(
            rt.create_queue(QueueOptions::new()).unwrap_err().code(),
            "CLOSED"
        );
        assert_eq!(queue.poll().unwrap_err().code(), "INVALID_QUEUE");
    }

    #[test]
    fn test_dispatcher_blocks_queue_destroy() {
        let rt = runtime();
        let queue = rt.create_queue(QueueOptions::new()).unwrap();
        let mut dispatcher = rt
            .create_dispatcher(
                queue.id(),
                DispatcherOptions::new().with_idle_timeout(Duration::from_millis(10)),
            )
            .unwrap();

        let err = rt.destroy_queue(queue.id()).unwrap_err();
        assert_eq!(err.code(), "RESOURCE_IN_USE");

        dispatcher.destroy().unwrap();
        assert_eq!(dispatcher.destroy().unwrap_err().code(), "INVALID_DISPATCHER");
        rt.destroy_queue(queue.id()).unwrap();
        rt.close().unwrap();
    }
}
