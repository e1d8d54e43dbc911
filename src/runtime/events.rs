//! Event lifecycle on the runtime.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::arena::Arena;
use super::{Runtime, RuntimeInner};
use crate::codec;
use crate::event::registry::RegistryEntry;
use crate::event::timer::TimerSink;
use crate::event::{EventKind, EventSpec, EventState, Invocation, Trigger};
use crate::message::MessageValue;
use crate::queue::{EventQueue, PendingEvent};
use crate::subject::Subject;
use crate::transport::{InboundSink, Transport};
use crate::types::{DestroyPolicy, Error, EventId, QueueId, Result, SubscriptionId};

/// Arena record for one event identity. `binding` is `None` while Created.
pub(crate) struct EventRecord {
    binding: Option<Binding>,
}

struct Binding {
    queue: QueueId,
    trigger: BoundTrigger,
}

enum BoundTrigger {
    Timer {
        interval: Duration,
        seq: u64,
    },
    Listener {
        subject: Subject,
        transport: Arc<dyn Transport>,
        subscription: SubscriptionId,
    },
}

impl EventRecord {
    fn created() -> Self {
        Self { binding: None }
    }

    fn state(&self) -> EventState {
        match self.binding {
            Some(_) => EventState::Active,
            None => EventState::Created,
        }
    }

    /// Drop the transport subscription of a listener. No-op otherwise.
    pub(super) fn unsubscribe(&self) {
        if let Some(binding) = &self.binding {
            binding.trigger.unsubscribe();
        }
    }
}

impl BoundTrigger {
    fn unsubscribe(&self) {
        if let BoundTrigger::Listener {
            transport,
            subscription,
            ..
        } = self
        {
            if let Err(e) = transport.unsubscribe(*subscription) {
                warn!("unsubscribe {} failed: {}", subscription, e);
            }
        }
    }
}

/// Trigger state between validation and binding.
enum PendingTrigger {
    Timer { interval: Duration },
    Listener(BoundTrigger),
}

impl Arena<EventId, EventRecord> {
    pub(super) fn handles_on_queue(&self, queue: QueueId) -> Vec<EventId> {
        self.iter()
            .filter(|(_, r)| r.binding.as_ref().is_some_and(|b| b.queue == queue))
            .map(|(id, _)| id)
            .collect()
    }
}

impl Runtime {
    /// Reserve an event identity in the Created state.
    pub fn new_event(&self) -> Result<EventId> {
        self.ensure_open()?;
        let id = self.inner.events.lock().insert(EventRecord::created());
        debug!("reserved {}", id);
        Ok(id)
    }

    /// Bind a Created identity to a trigger, making it Active.
    ///
    /// Validation failures leave nothing registered. The transport is
    /// subscribed without the events lock held; deliveries that arrive before
    /// the binding completes are dropped.
    pub fn create(&self, id: EventId, spec: EventSpec) -> Result<()> {
        self.ensure_open()?;
        let EventSpec {
            trigger,
            queue,
            callback,
            closure,
        } = spec;

        let callback =
            callback.ok_or_else(|| Error::invalid_callback(format!("{} has no callback", id)))?;
        let trigger = validate_trigger(trigger)?;
        let queue_id = queue.unwrap_or_else(|| self.inner.default_queue.id());
        self.live_queue(queue_id)?;

        {
            let events = self.inner.events.lock();
            let record = events.get(id).ok_or_else(|| self.missing(id))?;
            if record.binding.is_some() {
                return Err(Error::id_in_use(format!("{} is already active", id)));
            }
            self.inner
                .registry
                .insert(RegistryEntry::new(id, callback, closure))?;
        }

        let pending = match trigger {
            ValidTrigger::Timer { interval } => PendingTrigger::Timer { interval },
            ValidTrigger::Listener { subject, transport } => {
                let sink = Arc::new(ListenerSink {
                    runtime: Arc::downgrade(&self.inner),
                    event: id,
                });
                match transport.subscribe(&subject, sink) {
                    Ok(subscription) => PendingTrigger::Listener(BoundTrigger::Listener {
                        subject,
                        transport,
                        subscription,
                    }),
                    Err(e) => {
                        self.inner.registry.remove(id);
                        return Err(e);
                    }
                }
            }
        };

        let mut events = self.inner.events.lock();
        let checked = self.live_queue(queue_id).and_then(|queue| match events.get(id) {
            Some(record) if record.binding.is_none() => Ok(queue),
            Some(_) => Err(Error::id_in_use(format!("{} is already active", id))),
            None => Err(self.missing(id)),
        });
        let queue = match checked {
            Ok(queue) => queue,
            Err(e) => {
                drop(events);
                self.inner.registry.remove(id);
                if let PendingTrigger::Listener(trigger) = pending {
                    trigger.unsubscribe();
                }
                return Err(e);
            }
        };

        let trigger = match pending {
            PendingTrigger::Timer { interval } => {
                let seq = self.inner.timers.next_seq();
                self.inner
                    .timers
                    .schedule(id, seq, Instant::now() + interval);
                BoundTrigger::Timer { interval, seq }
            }
            PendingTrigger::Listener(trigger) => trigger,
        };
        if let Some(record) = events.get_mut(id) {
            record.binding = Some(Binding {
                queue: queue.id(),
                trigger,
            });
        }
        debug!("activated {} on {}", id, queue.id());
        Ok(())
    }

    fn live_queue(&self, id: QueueId) -> Result<EventQueue> {
        self.inner
            .queue_handle(id)
            .filter(|q| q.is_valid())
            .ok_or_else(|| Error::invalid_queue(format!("{} does not exist", id)))
    }

    /// Reserve and bind a timer in one step.
    pub fn create_timer<F>(&self, queue: QueueId, interval: Duration, callback: F) -> Result<EventId>
    where
        F: Fn(&mut Invocation<'_>) + Send + Sync + 'static,
    {
        let spec = EventSpec::timer(interval).on_queue(queue).callback(callback);
        self.reserve_and_create(spec)
    }

    /// Reserve and bind a listener in one step.
    pub fn create_listener<F>(
        &self,
        queue: QueueId,
        transport: Arc<dyn Transport>,
        subject: &str,
        callback: F,
    ) -> Result<EventId>
    where
        F: Fn(&mut Invocation<'_>) + Send + Sync + 'static,
    {
        let spec = EventSpec::listener(subject, transport)
            .on_queue(queue)
            .callback(callback);
        self.reserve_and_create(spec)
    }

    fn reserve_and_create(&self, spec: EventSpec) -> Result<EventId> {
        let id = self.new_event()?;
        if let Err(e) = self.create(id, spec) {
            self.inner.events.lock().remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Destroy an event. Unknown or already destroyed ids fail with `NotFound`.
    ///
    /// No invocation of the event starts after this returns. Under
    /// [`DestroyPolicy::Barrier`] an invocation running on another thread is
    /// waited for; one running on the calling thread is not.
    pub fn destroy(&self, id: EventId) -> Result<()> {
        self.ensure_open()?;
        self.release(id)
    }

    pub(super) fn release(&self, id: EventId) -> Result<()> {
        let (record, entry) = {
            let mut events = self.inner.events.lock();
            let record = match events.remove(id) {
                Some(record) => record,
                None => {
                    drop(events);
                    return Err(self.missing(id));
                }
            };
            let entry = record.binding.as_ref().and_then(|binding| {
                if let Some(queue) = self.inner.queue_handle(binding.queue) {
                    queue.purge_event(id);
                }
                self.inner.registry.remove(id)
            });
            (record, entry)
        };
        record.unsubscribe();

        if let Some(entry) = entry {
            let wait = self.inner.config.events.destroy_policy == DestroyPolicy::Barrier;
            entry.retire(wait);
        }
        debug!("destroyed {}", id);
        Ok(())
    }

    /// Change a timer's interval. The next firing is `interval` from now.
    pub fn reset_interval(&self, id: EventId, interval: Duration) -> Result<()> {
        self.ensure_open()?;
        if interval.is_zero() {
            return Err(Error::invalid_argument("timer interval must be non-zero"));
        }

        let mut events = self.inner.events.lock();
        let record = events.get_mut(id).ok_or_else(|| self.missing(id))?;
        match record.binding.as_mut().map(|b| &mut b.trigger) {
            Some(BoundTrigger::Timer {
                interval: current,
                seq,
            }) => {
                *current = interval;
                *seq = self.inner.timers.next_seq();
                self.inner
                    .timers
                    .schedule(id, *seq, Instant::now() + interval);
                debug!("{} interval reset to {:?}", id, interval);
                Ok(())
            }
            Some(BoundTrigger::Listener { .. }) => Err(Error::invalid_argument(format!(
                "{} is a listener; listeners cannot be changed once active",
                id
            ))),
            None => Err(Error::invalid_argument(format!("{} is not active", id))),
        }
    }

    /// Current state. A handle this runtime issued and later destroyed
    /// reports `Destroyed`.
    pub fn event_state(&self, id: EventId) -> Result<EventState> {
        let events = self.inner.events.lock();
        match events.get(id) {
            Some(record) => Ok(record.state()),
            None if events.is_retired(id) => Ok(EventState::Destroyed),
            None => Err(Error::not_found(format!("{} was never created", id))),
        }
    }

    /// Trigger kind, or `None` while Created.
    pub fn event_kind(&self, id: EventId) -> Result<Option<EventKind>> {
        self.with_binding(id, |b| {
            b.map(|b| match b.trigger {
                BoundTrigger::Timer { .. } => EventKind::Timer,
                BoundTrigger::Listener { .. } => EventKind::Listener,
            })
        })
    }

    /// Queue the event fires onto, or `None` while Created.
    pub fn event_queue(&self, id: EventId) -> Result<Option<QueueId>> {
        self.with_binding(id, |b| b.map(|b| b.queue))
    }

    /// Interval of an Active timer.
    pub fn event_interval(&self, id: EventId) -> Result<Duration> {
        self.with_binding(id, |b| match b.map(|b| &b.trigger) {
            Some(BoundTrigger::Timer { interval, .. }) => Ok(*interval),
            _ => Err(Error::invalid_argument(format!("{} is not an active timer", id))),
        })?
    }

    /// Subject pattern of an Active listener.
    pub fn event_subject(&self, id: EventId) -> Result<String> {
        self.with_binding(id, |b| match b.map(|b| &b.trigger) {
            Some(BoundTrigger::Listener { subject, .. }) => Ok(subject.as_str().to_string()),
            _ => Err(Error::invalid_argument(format!(
                "{} is not an active listener",
                id
            ))),
        })?
    }

    /// Number of live (Created or Active) events.
    pub fn event_count(&self) -> usize {
        self.inner.events.lock().len()
    }

    fn with_binding<R>(&self, id: EventId, f: impl FnOnce(Option<&Binding>) -> R) -> Result<R> {
        let events = self.inner.events.lock();
        match events.get(id) {
            Some(record) => Ok(f(record.binding.as_ref())),
            None => {
                drop(events);
                Err(self.missing(id))
            }
        }
    }

    fn missing(&self, id: EventId) -> Error {
        Error::not_found(format!("{} does not exist or was destroyed", id))
    }
}

// =============================================================================
// Trigger validation
// =============================================================================

enum ValidTrigger {
    Timer {
        interval: Duration,
    },
    Listener {
        subject: Subject,
        transport: Arc<dyn Transport>,
    },
}

fn validate_trigger(trigger: Trigger) -> Result<ValidTrigger> {
    match trigger {
        Trigger::Timer { interval } => {
            if interval.is_zero() {
                return Err(Error::invalid_argument("timer interval must be non-zero"));
            }
            Ok(ValidTrigger::Timer { interval })
        }
        Trigger::Listener { subject, transport } => {
            let subject = Subject::pattern(&subject)?;
            if !transport.is_valid() {
                return Err(Error::invalid_transport(format!(
                    "transport for listener on {} is not valid",
                    subject
                )));
            }
            Ok(ValidTrigger::Listener { subject, transport })
        }
    }
}

// =============================================================================
// Firing
// =============================================================================

impl RuntimeInner {
    /// Queue a listener invocation carrying `message`. Deliveries for events
    /// no longer Active are dropped.
    fn enqueue_listener(&self, event: EventId, message: MessageValue) -> Result<()> {
        let events = self.events.lock();
        let queue = match events.get(event).and_then(|r| r.binding.as_ref()) {
            Some(Binding {
                queue,
                trigger: BoundTrigger::Listener { .. },
            }) => self.queue_handle(*queue),
            _ => None,
        };
        let Some(queue) = queue else {
            debug!("dropping delivery for inactive {}", event);
            return Ok(());
        };
        queue.enqueue(PendingEvent {
            event,
            message: Some(message.lend_to_runtime()),
        })?;
        Ok(())
    }
}

impl TimerSink for RuntimeInner {
    fn fire(&self, event: EventId, seq: u64) -> Option<Duration> {
        let events = self.events.lock();
        let binding = events.get(event)?.binding.as_ref()?;
        let BoundTrigger::Timer {
            interval,
            seq: current,
        } = &binding.trigger
        else {
            return None;
        };
        if *current != seq {
            return None;
        }
        let queue = self.queue_handle(binding.queue)?;
        queue
            .enqueue(PendingEvent {
                event,
                message: None,
            })
            .ok()?;
        Some(*interval)
    }
}

/// Transport-facing sink for one listener.
struct ListenerSink {
    runtime: Weak<RuntimeInner>,
    event: EventId,
}

impl InboundSink for ListenerSink {
    fn deliver(&self, subject: &Subject, reply: Option<&Subject>, payload: &[u8]) -> Result<()> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| Error::closed("runtime dropped"))?;

        let mut message = codec::decode(payload)?;
        let send = message
            .send_subject_ref()
            .cloned()
            .unwrap_or_else(|| subject.clone());
        let reply = message.reply_subject_ref().or(reply).cloned();
        message.set_subjects(Some(send), reply);

        runtime.enqueue_listener(self.event, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use crate::types::Config;

    fn runtime() -> Runtime {
        Runtime::open(Config::default()).unwrap()
    }

    fn noop(_: &mut Invocation<'_>) {}

    #[test]
    fn test_reserve_then_bind_timer() {
        let rt = runtime();
        let id = rt.new_event().unwrap();
        assert_eq!(rt.event_state(id).unwrap(), EventState::Created);
        assert_eq!(rt.event_queue(id).unwrap(), None);
        assert_eq!(rt.event_kind(id).unwrap(), None);

        rt.create(id, EventSpec::timer(Duration::from_secs(60)).callback(noop))
            .unwrap();
        assert_eq!(rt.event_state(id).unwrap(), EventState::Active);
        assert_eq!(rt.event_kind(id).unwrap(), Some(EventKind::Timer));
        assert_eq!(rt.event_queue(id).unwrap(), Some(rt.default_queue().id()));
        assert_eq!(rt.event_interval(id).unwrap(), Duration::from_secs(60));
        assert!(rt.registry().contains(id));

        let err = rt
            .create(id, EventSpec::timer(Duration::from_secs(1)).callback(noop))
            .unwrap_err();
        assert_eq!(err.code(), "ID_IN_USE");
        rt.close().unwrap();
    }

    #[test]
    fn test_create_validation_leaves_nothing_registered() {
        let rt = runtime();
        let id = rt.new_event().unwrap();

        let err = rt.create(id, EventSpec::timer(Duration::from_secs(1))).unwrap_err();
        assert_eq!(err.code(), "INVALID_CALLBACK");

        let err = rt
            .create(id, EventSpec::timer(Duration::ZERO).callback(noop))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        let queue = rt.create_queue(Default::default()).unwrap();
        rt.destroy_queue(queue.id()).unwrap();
        let err = rt
            .create(
                id,
                EventSpec::timer(Duration::from_secs(1))
                    .on_queue(queue.id())
                    .callback(noop),
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_QUEUE");

        assert_eq!(rt.event_state(id).unwrap(), EventState::Created);
        assert!(rt.registry().is_empty());
        rt.close().unwrap();
    }

    #[test]
    fn test_invalid_transport_rejected() {
        let rt = runtime();
        let mut transport = MockTransport::new();
        transport.expect_is_valid().return_const(false);
        transport.expect_subscribe().never();

        let err = rt
            .create_listener(rt.default_queue().id(), Arc::new(transport), "A.B", noop)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSPORT");
        assert_eq!(rt.event_count(), 0);
        rt.close().unwrap();
    }

    #[test]
    fn test_subscribe_failure_rolls_back() {
        let rt = runtime();
        let mut transport = MockTransport::new();
        transport.expect_is_valid().return_const(true);
        transport
            .expect_subscribe()
            .times(1)
            .returning(|_, _| Err(Error::invalid_transport("connection lost")));

        let id = rt.new_event().unwrap();
        let err = rt
            .create(
                id,
                EventSpec::listener("ORDERS.>", Arc::new(transport)).callback(noop),
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSPORT");
        assert_eq!(rt.event_state(id).unwrap(), EventState::Created);
        assert!(!rt.registry().contains(id));
        rt.close().unwrap();
    }

    #[test]
    fn test_listener_unsubscribes_on_destroy() {
        let rt = runtime();
        let mut transport = MockTransport::new();
        transport.expect_is_valid().return_const(true);
        transport
            .expect_subscribe()
            .withf(|pattern, _| pattern.as_str() == "ORDERS.*")
            .times(1)
            .returning(|_, _| Ok(SubscriptionId::new(7)));
        transport
            .expect_unsubscribe()
            .withf(|sub| sub.as_u64() == 7)
            .times(1)
            .returning(|_| Ok(()));

        let id = rt
            .create_listener(rt.default_queue().id(), Arc::new(transport), "ORDERS.*", noop)
            .unwrap();
        assert_eq!(rt.event_subject(id).unwrap(), "ORDERS.*");
        let err = rt.reset_interval(id, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        rt.destroy(id).unwrap();
        rt.close().unwrap();
    }

    #[test]
    fn test_bad_listener_subject() {
        let rt = runtime();
        let mut transport = MockTransport::new();
        transport.expect_is_valid().return_const(true);
        let err = rt
            .create_listener(rt.default_queue().id(), Arc::new(transport), "A..B", noop)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        rt.close().unwrap();
    }

    #[test]
    fn test_destroy_twice_and_state_after() {
        let rt = runtime();
        let id = rt
            .create_timer(rt.default_queue().id(), Duration::from_secs(60), noop)
            .unwrap();

        rt.destroy(id).unwrap();
        assert!(rt.destroy(id).unwrap_err().is_not_found());
        assert_eq!(rt.event_state(id).unwrap(), EventState::Destroyed);
        assert!(rt.event_interval(id).unwrap_err().is_not_found());
        assert!(rt.registry().is_empty());

        let created_only = rt.new_event().unwrap();
        rt.destroy(created_only).unwrap();
        assert!(rt.destroy(created_only).unwrap_err().is_not_found());
        rt.close().unwrap();
    }

    #[test]
    fn test_event_handles_are_scoped_to_their_runtime() {
        let rt1 = runtime();
        let rt2 = runtime();
        let id1 = rt1
            .create_timer(rt1.default_queue().id(), Duration::from_secs(60), noop)
            .unwrap();
        let id2 = rt2
            .create_timer(rt2.default_queue().id(), Duration::from_secs(60), noop)
            .unwrap();
        assert_ne!(id1, id2);

        assert!(rt2.destroy(id1).unwrap_err().is_not_found());
        assert!(rt2.event_state(id1).unwrap_err().is_not_found());
        assert!(rt2.registry().contains(id2));
        assert_eq!(rt2.event_state(id2).unwrap(), EventState::Active);

        rt1.destroy(id1).unwrap();
        assert!(rt2.event_state(id1).unwrap_err().is_not_found());
        assert_eq!(rt1.event_state(id1).unwrap(), EventState::Destroyed);

        let err = rt2
            .create_timer(rt1.default_queue().id(), Duration::from_secs(1), noop)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_QUEUE");
        rt1.close().unwrap();
        rt2.close().unwrap();
    }

    #[test]
    fn test_subscribe_may_deliver_synchronously() {
        let rt = runtime();
        let mut transport = MockTransport::new();
        transport.expect_is_valid().return_const(true);
        transport.expect_subscribe().times(1).returning(|pattern, sink| {
            let mut msg = MessageValue::new();
            msg.add("DATA", "early").unwrap();
            let bytes = codec::encode(&msg).unwrap();
            sink.deliver(pattern, None, &bytes).unwrap();
            Ok(SubscriptionId::new(3))
        });
        transport.expect_unsubscribe().returning(|_| Ok(()));

        let id = rt
            .create_listener(rt.default_queue().id(), Arc::new(transport), "EARLY", noop)
            .unwrap();
        assert_eq!(rt.event_state(id).unwrap(), EventState::Active);
        assert_eq!(rt.default_queue().count().unwrap(), 0);
        rt.close().unwrap();
    }

    #[test]
    fn test_reset_interval_validation() {
        let rt = runtime();
        let id = rt
            .create_timer(rt.default_queue().id(), Duration::from_secs(60), noop)
            .unwrap();
        assert_eq!(
            rt.reset_interval(id, Duration::ZERO).unwrap_err().code(),
            "INVALID_ARGUMENT"
        );
        rt.reset_interval(id, Duration::from_secs(30)).unwrap();
        assert_eq!(rt.event_interval(id).unwrap(), Duration::from_secs(30));

        let pending = rt.new_event().unwrap();
        assert_eq!(
            rt.reset_interval(pending, Duration::from_secs(1))
                .unwrap_err()
                .code(),
            "INVALID_ARGUMENT"
        );
        rt.close().unwrap();
    }
}
