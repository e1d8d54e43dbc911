//! Event queues.
//!
//! An [`EventQueue`] is a FIFO of ready callback invocations. Timers and
//! listeners push invocations in; a consumer drains them one at a time with
//! [`EventQueue::dispatch`], [`EventQueue::timed_dispatch`] or
//! [`EventQueue::poll`], or hands the queue to a [`Dispatcher`] thread.
//!
//! Ordering is strict FIFO within a queue and unspecified across queues.
//! Callbacks run to completion on the consuming thread; a slow callback
//! delays everything behind it.
//!
//! Only one thread should consume a given queue at a time.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::message::MessageValue;
use crate::runtime::{Runtime, RuntimeInner};
use crate::types::{Deadline, Error, EventId, QueueConfig, QueueId, Result, Timeout};

pub mod dispatcher;

pub use dispatcher::{Dispatcher, DispatcherOptions};

// =============================================================================
// Limit policy
// =============================================================================

/// What happens to an arrival that would push the pending count past
/// `max_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitPolicy {
    /// Unbounded queue.
    #[default]
    None,
    /// Drop the arrival.
    DiscardNew,
    /// Evict `discard_amount` oldest pending invocations, then admit.
    DiscardFirst,
    /// Evict `discard_amount` newest pending invocations, then admit.
    DiscardLast,
}

/// Admission limits for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QueueLimits {
    pub policy: LimitPolicy,
    pub max_events: usize,
    pub discard_amount: usize,
}

impl QueueLimits {
    pub fn new(policy: LimitPolicy, max_events: usize, discard_amount: usize) -> Result<Self> {
        let limits = Self {
            policy,
            max_events,
            discard_amount,
        };
        limits.validate()?;
        Ok(limits)
    }

    fn validate(&self) -> Result<()> {
        match self.policy {
            LimitPolicy::None => Ok(()),
            _ if self.max_events == 0 => Err(Error::invalid_argument(format!(
                "{:?} requires max_events > 0",
                self.policy
            ))),
            LimitPolicy::DiscardNew => Ok(()),
            LimitPolicy::DiscardFirst | LimitPolicy::DiscardLast => {
                if self.discard_amount == 0 || self.discard_amount > self.max_events {
                    return Err(Error::invalid_argument(format!(
                        "discard_amount must be in 1..={}, got {}",
                        self.max_events, self.discard_amount
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Options for [`Runtime::create_queue`](crate::Runtime::create_queue).
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    pub name: Option<String>,
    pub priority: Option<u32>,
    /// Falls back to the runtime's configured default limits.
    pub limits: Option<QueueLimits>,
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_limits(mut self, limits: QueueLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Counters for one queue.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub admitted: u64,
    pub discarded: u64,
    pub dispatched: u64,
}

/// Result of offering an invocation to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Admitted,
    /// Admitted after evicting this many pending invocations.
    AdmittedWithEviction(usize),
    Dropped,
}

/// One ready callback invocation.
#[derive(Debug)]
pub(crate) struct PendingEvent {
    pub(crate) event: EventId,
    pub(crate) message: Option<MessageValue>,
}

// =============================================================================
// Queue core
// =============================================================================

#[derive(Debug)]
struct QueueState {
    name: Option<String>,
    priority: u32,
    limits: QueueLimits,
    pending: VecDeque<PendingEvent>,
    destroyed: bool,
    stats: QueueStats,
}

#[derive(Debug)]
pub(crate) struct QueueCore {
    id: QueueId,
    is_default: bool,
    depth_warning: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
    dispatchers: AtomicUsize,
    runtime: Weak<RuntimeInner>,
}

impl QueueCore {
    fn admit(&self, state: &mut QueueState, pending: PendingEvent) -> Admission {
        let limits = state.limits;
        let mut evicted = 0;
        if limits.policy != LimitPolicy::None && state.pending.len() >= limits.max_events {
            match limits.policy {
                LimitPolicy::DiscardNew => {
                    state.stats.discarded += 1;
                    return Admission::Dropped;
                }
                LimitPolicy::DiscardFirst => {
                    evicted = limits.discard_amount.min(state.pending.len());
                    state.pending.drain(..evicted);
                }
                LimitPolicy::DiscardLast => {
                    evicted = limits.discard_amount.min(state.pending.len());
                    let keep = state.pending.len() - evicted;
                    state.pending.truncate(keep);
                }
                LimitPolicy::None => {}
            }
            state.stats.discarded += evicted as u64;
        }

        state.pending.push_back(pending);
        state.stats.admitted += 1;
        if self.depth_warning > 0 && state.pending.len() == self.depth_warning {
            tracing::warn!(
                "queue {} reached {} pending invocations",
                self.id,
                self.depth_warning
            );
        }

        if evicted > 0 {
            Admission::AdmittedWithEviction(evicted)
        } else {
            Admission::Admitted
        }
    }
}

// =============================================================================
// EventQueue handle
// =============================================================================

/// Cloneable handle to a queue owned by a [`Runtime`].
///
/// Every operation fails with `InvalidQueue` once the queue is destroyed.
#[derive(Debug, Clone)]
pub struct EventQueue {
    core: Arc<QueueCore>,
}

impl EventQueue {
    pub(crate) fn new(
        id: QueueId,
        is_default: bool,
        options: QueueOptions,
        defaults: &QueueConfig,
        runtime: Weak<RuntimeInner>,
    ) -> Self {
        let limits = if is_default {
            QueueLimits::default()
        } else {
            options.limits.unwrap_or(defaults.default_limits)
        };
        Self {
            core: Arc::new(QueueCore {
                id,
                is_default,
                depth_warning: defaults.depth_warning,
                state: Mutex::new(QueueState {
                    name: options.name,
                    priority: options.priority.unwrap_or(defaults.default_priority),
                    limits,
                    pending: VecDeque::new(),
                    destroyed: false,
                    stats: QueueStats::default(),
                }),
                ready: Condvar::new(),
                dispatchers: AtomicUsize::new(0),
                runtime,
            }),
        }
    }

    pub fn id(&self) -> QueueId {
        self.core.id
    }

    /// True for the runtime's reserved default queue.
    pub fn is_default(&self) -> bool {
        self.core.is_default
    }

    pub fn is_valid(&self) -> bool {
        !self.core.state.lock().destroyed
    }

    pub fn name(&self) -> Result<Option<String>> {
        let state = self.live_state()?;
        Ok(state.name.clone())
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        let mut state = self.live_state()?;
        state.name = Some(name.into());
        Ok(())
    }

    pub fn priority(&self) -> Result<u32> {
        Ok(self.live_state()?.priority)
    }

    pub fn set_priority(&self, priority: u32) -> Result<()> {
        self.live_state()?.priority = priority;
        Ok(())
    }

    pub fn limit_policy(&self) -> Result<QueueLimits> {
        Ok(self.live_state()?.limits)
    }

    /// Change the admission policy. Rejected on the default queue.
    ///
    /// Already-pending invocations are kept even if they exceed the new limit.
    pub fn set_limit_policy(
        &self,
        policy: LimitPolicy,
        max_events: usize,
        discard_amount: usize,
    ) -> Result<()> {
        if self.core.is_default {
            return Err(Error::invalid_queue(
                "limit policy of the default queue cannot be changed",
            ));
        }
        let limits = QueueLimits::new(policy, max_events, discard_amount)?;
        self.live_state()?.limits = limits;
        tracing::debug!(
            "queue {} limit policy set: {:?} max={} discard={}",
            self.core.id,
            policy,
            max_events,
            discard_amount
        );
        Ok(())
    }

    /// Number of pending invocations.
    pub fn count(&self) -> Result<usize> {
        Ok(self.live_state()?.pending.len())
    }

    /// Events with a pending invocation, oldest first.
    pub fn pending_events(&self) -> Result<Vec<EventId>> {
        Ok(self.live_state()?.pending.iter().map(|p| p.event).collect())
    }

    pub fn stats(&self) -> Result<QueueStats> {
        Ok(self.live_state()?.stats.clone())
    }

    /// Number of dispatchers currently bound to this queue.
    pub fn dispatcher_count(&self) -> usize {
        self.core.dispatchers.load(Ordering::SeqCst)
    }

    /// Block until an invocation is ready and run exactly one callback.
    pub fn dispatch(&self) -> Result<()> {
        self.timed_dispatch(Timeout::WaitForever)
    }

    /// Run exactly one callback, waiting at most `timeout` for one to be ready.
    ///
    /// Returns `Timeout` when nothing arrived in time. Invocations for events
    /// destroyed after they were queued are skipped and do not count.
    pub fn timed_dispatch(&self, timeout: impl Into<Timeout>) -> Result<()> {
        let deadline = timeout.into().deadline();
        loop {
            let pending = self.next_pending(deadline)?;
            let runtime = self
                .core
                .runtime
                .upgrade()
                .map(Runtime::from_inner)
                .ok_or_else(|| Error::closed("runtime dropped"))?;

            if runtime.invoke(self.core.id, pending)? {
                self.core.state.lock().stats.dispatched += 1;
                return Ok(());
            }
        }
    }

    /// Run one callback if one is ready. Never blocks.
    ///
    /// Returns whether a callback ran.
    pub fn poll(&self) -> Result<bool> {
        match self.timed_dispatch(Timeout::NoWait) {
            Ok(()) => Ok(true),
            Err(Error::Timeout(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Destroy this queue through its runtime.
    pub fn destroy(&self) -> Result<()> {
        let runtime = self
            .core
            .runtime
            .upgrade()
            .map(Runtime::from_inner)
            .ok_or_else(|| Error::closed("runtime dropped"))?;
        runtime.destroy_queue(self.core.id)
    }

    // =========================================================================
    // Crate-internal
    // =========================================================================

    pub(crate) fn enqueue(&self, pending: PendingEvent) -> Result<Admission> {
        let mut state = self.live_state()?;
        let event = pending.event;
        let admission = self.core.admit(&mut state, pending);
        drop(state);

        match admission {
            Admission::Dropped => {
                tracing::warn!("queue {} discarded arrival for {}", self.core.id, event)
            }
            Admission::AdmittedWithEviction(n) => {
                tracing::debug!("queue {} evicted {} pending to admit {}", self.core.id, n, event);
                self.core.ready.notify_one();
            }
            Admission::Admitted => {
                self.core.ready.notify_one();
            }
        }
        Ok(admission)
    }

    /// Drop every pending invocation of `event`.
    pub(crate) fn purge_event(&self, event: EventId) -> usize {
        let mut state = self.core.state.lock();
        let before = state.pending.len();
        state.pending.retain(|p| p.event != event);
        before - state.pending.len()
    }

    /// Mark destroyed, drop pending invocations, wake blocked consumers.
    pub(crate) fn shut_down(&self) -> usize {
        let mut state = self.core.state.lock();
        if state.destroyed {
            return 0;
        }
        state.destroyed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        drop(state);
        self.core.ready.notify_all();
        dropped
    }

    pub(crate) fn bind_dispatcher(&self) -> Result<()> {
        let _state = self.live_state()?;
        self.core.dispatchers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn unbind_dispatcher(&self) {
        self.core.dispatchers.fetch_sub(1, Ordering::SeqCst);
    }

    fn live_state(&self) -> Result<parking_lot::MutexGuard<'_, QueueState>> {
        let state = self.core.state.lock();
        if state.destroyed {
            return Err(Error::invalid_queue(format!(
                "queue {} has been destroyed",
                self.core.id
            )));
        }
        Ok(state)
    }

    fn next_pending(&self, deadline: Deadline) -> Result<PendingEvent> {
        let mut state = self.core.state.lock();
        loop {
            if state.destroyed {
                return Err(Error::invalid_queue(format!(
                    "queue {} has been destroyed",
                    self.core.id
                )));
            }
            if let Some(pending) = state.pending.pop_front() {
                return Ok(pending);
            }
            match deadline {
                Deadline::Now => {
                    return Err(Error::timeout(format!("queue {} is empty", self.core.id)))
                }
                Deadline::Never => self.core.ready.wait(&mut state),
                Deadline::At(at) => {
                    if self.core.ready.wait_until(&mut state, at).timed_out()
                        && state.pending.is_empty()
                        && !state.destroyed
                    {
                        return Err(Error::timeout(format!(
                            "no event arrived on queue {}",
                            self.core.id
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Handle;

    fn detached_queue(limits: QueueLimits) -> EventQueue {
        EventQueue::new(
            QueueId::from_parts(1, 1, 0),
            false,
            QueueOptions::new().with_limits(limits),
            &QueueConfig::default(),
            Weak::new(),
        )
    }

    fn arrival(n: u32) -> PendingEvent {
        PendingEvent {
            event: EventId::from_parts(1, n, 0),
            message: None,
        }
    }

    fn ids(queue: &EventQueue) -> Vec<u32> {
        queue
            .pending_events()
            .unwrap()
            .iter()
            .map(|e| e.slot())
            .collect()
    }

    #[test]
    fn test_unbounded_fifo() {
        let queue = detached_queue(QueueLimits::default());
        for n in 1..=5 {
            assert_eq!(queue.enqueue(arrival(n)).unwrap(), Admission::Admitted);
        }
        assert_eq!(ids(&queue), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_discard_first() {
        let queue = detached_queue(QueueLimits::new(LimitPolicy::DiscardFirst, 3, 1).unwrap());
        for n in 1..=5 {
            queue.enqueue(arrival(n)).unwrap();
        }
        assert_eq!(ids(&queue), vec![3, 4, 5]);
        assert_eq!(queue.stats().unwrap().discarded, 2);
    }

    #[test]
    fn test_discard_last() {
        let queue = detached_queue(QueueLimits::new(LimitPolicy::DiscardLast, 3, 2).unwrap());
        for n in 1..=5 {
            queue.enqueue(arrival(n)).unwrap();
        }
        // 1,2,3 -> arrival 4 evicts 2,3 -> 1,4 -> arrival 5 fits
        assert_eq!(ids(&queue), vec![1, 4, 5]);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_discard_new() {
        let queue = detached_queue(QueueLimits::new(LimitPolicy::DiscardNew, 2, 0).unwrap());
        assert_eq!(queue.enqueue(arrival(1)).unwrap(), Admission::Admitted);
        assert_eq!(queue.enqueue(arrival(2)).unwrap(), Admission::Admitted);
        assert_eq!(queue.enqueue(arrival(3)).unwrap(), Admission::Dropped);
        assert_eq!(ids(&queue), vec![1, 2]);
        assert!(logs_contain("discarded arrival"));
    }

    #[test]
    fn test_invalid_limits() {
        assert!(QueueLimits::new(LimitPolicy::DiscardNew, 0, 0).is_err());
        assert!(QueueLimits::new(LimitPolicy::DiscardFirst, 3, 0).is_err());
        assert!(QueueLimits::new(LimitPolicy::DiscardLast, 3, 4).is_err());
        assert!(QueueLimits::new(LimitPolicy::None, 0, 0).is_ok());
    }

    #[test]
    fn test_default_queue_rejects_limit_change() {
        let queue = EventQueue::new(
            QueueId::from_parts(1, 0, 0),
            true,
            QueueOptions::new(),
            &QueueConfig::default(),
            Weak::new(),
        );
        let err = queue
            .set_limit_policy(LimitPolicy::DiscardNew, 10, 0)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_QUEUE");
    }

    #[test]
    fn test_purge_and_shut_down() {
        let queue = detached_queue(QueueLimits::default());
        queue.enqueue(arrival(1)).unwrap();
        queue.enqueue(arrival(2)).unwrap();
        queue.enqueue(arrival(1)).unwrap();

        assert_eq!(queue.purge_event(EventId::from_parts(1, 1, 0)), 2);
        assert_eq!(ids(&queue), vec![2]);

        assert_eq!(queue.shut_down(), 1);
        assert_eq!(queue.count().unwrap_err().code(), "INVALID_QUEUE");
        assert_eq!(queue.poll().unwrap_err().code(), "INVALID_QUEUE");
        assert!(queue.enqueue(arrival(3)).is_err());
    }

    #[test]
    fn test_poll_empty_queue_does_not_block() {
        let queue = detached_queue(QueueLimits::default());
        assert!(!queue.poll().unwrap());
        let err = queue
            .timed_dispatch(std::time::Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_name_and_priority() {
        let queue = detached_queue(QueueLimits::default());
        assert_eq!(queue.name().unwrap(), None);
        queue.set_name("lane-a").unwrap();
        queue.set_priority(7).unwrap();
        assert_eq!(queue.name().unwrap().as_deref(), Some("lane-a"));
        assert_eq!(queue.priority().unwrap(), 7);
    }
}
