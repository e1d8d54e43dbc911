//! Timer service.
//!
//! One background thread per runtime holds a min-heap of `(due, seq, event)`
//! entries and sleeps until the earliest is due. A due entry is handed to the
//! [`TimerSink`], which enqueues the invocation and returns the interval to
//! reschedule with, or `None` when the entry is stale (event destroyed, or its
//! interval was reset and a newer entry exists).
//!
//! Ticks missed while the thread was late are skipped rather than replayed.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::types::{Error, EventId, Result};

/// Receiver of due timers.
pub(crate) trait TimerSink: Send + Sync {
    /// Fire `event` for schedule `seq`. Returns the interval to reschedule
    /// with, or `None` to drop the entry.
    fn fire(&self, event: EventId, seq: u64) -> Option<Duration>;
}

#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    due: Instant,
    seq: u64,
    event: EventId,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is max-heap, so reverse: earliest due first
        other
            .due
            .cmp(&self.due)
            // Then creation order for equal deadlines
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct TimerState {
    heap: BinaryHeap<Scheduled>,
    stopped: bool,
}

#[derive(Debug, Default)]
pub(crate) struct TimerService {
    state: Mutex<TimerState>,
    wake: Condvar,
    next_seq: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
    worker: Mutex<Option<ThreadId>>,
}

impl TimerService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn the service thread.
    pub(crate) fn start(self: &Arc<Self>, sink: Weak<dyn TimerSink>, name: &str) -> Result<()> {
        let service = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || service.run(sink))
            .map_err(|e| Error::fatal_init(format!("cannot spawn timer thread: {e}")))?;
        *self.worker.lock() = Some(handle.thread().id());
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Fresh schedule sequence number. Entries carrying an older number for
    /// the same event are ignored by the sink.
    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, AtomicOrdering::SeqCst)
    }

    pub(crate) fn schedule(&self, event: EventId, seq: u64, due: Instant) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        let earliest = state.heap.peek().map_or(true, |top| due < top.due);
        state.heap.push(Scheduled { due, seq, event });
        drop(state);
        if earliest {
            self.wake.notify_one();
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Signal the thread to exit without waiting for it.
    pub(crate) fn signal_stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.heap.clear();
        drop(state);
        self.wake.notify_all();
    }

    /// Signal and join, unless called from the timer thread itself.
    pub(crate) fn stop(&self) {
        self.signal_stop();
        let on_worker = *self.worker.lock() == Some(thread::current().id());
        if on_worker {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("timer thread panicked");
            }
        }
    }

    fn run(&self, sink: Weak<dyn TimerSink>) {
        debug!("timer thread started");
        loop {
            let due = match self.wait_for_due() {
                Some(due) => due,
                None => break,
            };
            let Some(sink) = sink.upgrade() else {
                break;
            };
            for entry in due {
                if let Some(interval) = sink.fire(entry.event, entry.seq) {
                    let now = Instant::now();
                    let mut next = entry.due + interval;
                    if next <= now {
                        next = now + interval;
                    }
                    self.schedule(entry.event, entry.seq, next);
                }
            }
        }
        debug!("timer thread exiting");
    }

    /// Block until at least one entry is due; `None` once stopped.
    fn wait_for_due(&self) -> Option<Vec<Scheduled>> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            let now = Instant::now();
            match state.heap.peek().map(|top| top.due) {
                None => self.wake.wait(&mut state),
                Some(due) if due > now => {
                    self.wake.wait_until(&mut state, due);
                }
                Some(_) => {
                    let mut ready = Vec::new();
                    while state.heap.peek().is_some_and(|top| top.due <= now) {
                        if let Some(entry) = state.heap.pop() {
                            ready.push(entry);
                        }
                    }
                    return Some(ready);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Handle;

    #[derive(Default)]
    struct RecordingSink {
        fired: Mutex<Vec<(EventId, u64)>>,
        repeat: Option<Duration>,
    }

    impl TimerSink for RecordingSink {
        fn fire(&self, event: EventId, seq: u64) -> Option<Duration> {
            self.fired.lock().push((event, seq));
            self.repeat
        }
    }

    #[test]
    fn test_heap_orders_by_due_then_seq() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        let id = |n| EventId::from_parts(1, n, 0);
        heap.push(Scheduled { due: now + Duration::from_millis(20), seq: 0, event: id(0) });
        heap.push(Scheduled { due: now + Duration::from_millis(10), seq: 2, event: id(2) });
        heap.push(Scheduled { due: now + Duration::from_millis(10), seq: 1, event: id(1) });

        let order: Vec<u32> = std::iter::from_fn(|| heap.pop()).map(|s| s.event.slot()).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_one_shot_fires_once_in_order() {
        let service = Arc::new(TimerService::new());
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn TimerSink> = Arc::downgrade(&sink) as Weak<dyn TimerSink>;
        service.start(weak, "timer-test").unwrap();

        let now = Instant::now();
        service.schedule(EventId::from_parts(1, 2, 0), 1, now + Duration::from_millis(30));
        service.schedule(EventId::from_parts(1, 1, 0), 0, now + Duration::from_millis(10));
        thread::sleep(Duration::from_millis(120));
        service.stop();

        let fired: Vec<u32> = sink.fired.lock().iter().map(|(e, _)| e.slot()).collect();
        assert_eq!(fired, vec![1, 2]);
        assert_eq!(service.pending(), 0);
    }

    #[test]
    fn test_stop_is_prompt_with_far_deadline() {
        let service = Arc::new(TimerService::new());
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn TimerSink> = Arc::downgrade(&sink) as Weak<dyn TimerSink>;
        service.start(weak, "timer-test").unwrap();
        service.schedule(EventId::from_parts(1, 1, 0), 0, Instant::now() + Duration::from_secs(3600));

        let started = Instant::now();
        service.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(sink.fired.lock().is_empty());
    }
}
