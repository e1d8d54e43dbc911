//! Callback-lifetime registry.
//!
//! Keeps each Active event's callback and closure alive between the moment a
//! trigger fires and the moment its invocation runs. Every invocation clones
//! the entry's `Arc` before running, so destroying an event (even from inside
//! its own callback) never frees a callback that is still executing.
//!
//! Entries also track which threads are currently running them. `retire()`
//! closes the entry to new runs and can wait for other threads to finish.
//! A thread that is itself inside a callback never waits: two callbacks
//! destroying each other's events would otherwise block forever.

use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tracing::debug;

use super::{Callback, Closure};
use crate::types::{Error, EventId, Result};

thread_local! {
    /// Callbacks currently running on this thread.
    static RUNNING: Cell<usize> = const { Cell::new(0) };
}

/// True while the current thread is inside any callback.
pub(crate) fn in_callback() -> bool {
    RUNNING.with(|r| r.get() > 0)
}

#[derive(Debug, Default)]
struct Flight {
    retired: bool,
    runners: Vec<ThreadId>,
}

/// One retained (callback, closure) pair.
pub(crate) struct RegistryEntry {
    pub(crate) event: EventId,
    pub(crate) callback: Callback,
    pub(crate) closure: Option<Closure>,
    flight: Mutex<Flight>,
    idle: Condvar,
}

impl RegistryEntry {
    pub(crate) fn new(event: EventId, callback: Callback, closure: Option<Closure>) -> Self {
        Self {
            event,
            callback,
            closure,
            flight: Mutex::new(Flight::default()),
            idle: Condvar::new(),
        }
    }

    /// Register the current thread as running this entry.
    ///
    /// Returns `None` once the entry is retired.
    pub(crate) fn begin(&self) -> Option<FlightGuard<'_>> {
        let mut flight = self.flight.lock();
        if flight.retired {
            return None;
        }
        flight.runners.push(thread::current().id());
        RUNNING.with(|r| r.set(r.get() + 1));
        Some(FlightGuard { entry: self })
    }

    fn end(&self) {
        RUNNING.with(|r| r.set(r.get().saturating_sub(1)));
        let me = thread::current().id();
        let mut flight = self.flight.lock();
        if let Some(pos) = flight.runners.iter().position(|t| *t == me) {
            flight.runners.swap_remove(pos);
        }
        if flight.runners.is_empty() {
            self.idle.notify_all();
        }
    }

    /// Close the entry to new runs. With `wait`, block until every run on
    /// another thread has finished.
    ///
    /// The wait is skipped when the calling thread is running any callback,
    /// including this entry's own.
    pub(crate) fn retire(&self, wait: bool) {
        let mut flight = self.flight.lock();
        flight.retired = true;
        if !wait || flight.runners.is_empty() {
            return;
        }
        if in_callback() {
            debug!(
                "{} retired from inside a callback, not waiting for {} run(s)",
                self.event,
                flight.runners.len()
            );
            return;
        }
        while !flight.runners.is_empty() {
            self.idle.wait(&mut flight);
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.flight.lock().runners.len()
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("event", &self.event)
            .field("has_closure", &self.closure.is_some())
            .field("flight", &*self.flight.lock())
            .finish()
    }
}

/// Marks one run; ends it on drop, including when the callback panics.
pub(crate) struct FlightGuard<'a> {
    entry: &'a RegistryEntry,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.entry.end();
    }
}

/// Table of retained callbacks keyed by event identity.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    entries: Mutex<HashMap<EventId, Arc<RegistryEntry>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, entry: RegistryEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&entry.event) {
            return Err(Error::id_in_use(format!(
                "{} already has a registered callback",
                entry.event
            )));
        }
        entries.insert(entry.event, Arc::new(entry));
        Ok(())
    }

    pub(crate) fn lookup(&self, event: EventId) -> Option<Arc<RegistryEntry>> {
        self.entries.lock().get(&event).cloned()
    }

    /// Remove and return the entry. Unknown ids are not an error.
    pub(crate) fn remove(&self, event: EventId) -> Option<Arc<RegistryEntry>> {
        self.entries.lock().remove(&event)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, event: EventId) -> bool {
        self.entries.lock().contains_key(&event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Handle;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn entry(n: u32) -> RegistryEntry {
        RegistryEntry::new(EventId::from_parts(1, n, 0), Arc::new(|_| {}), None)
    }

    #[test]
    fn test_insert_lookup_remove() {
        let registry = CallbackRegistry::new();
        let id = EventId::from_parts(1, 1, 0);
        registry.insert(entry(1)).unwrap();
        assert!(registry.contains(id));

        let err = registry.insert(entry(1)).unwrap_err();
        assert_eq!(err.code(), "ID_IN_USE");

        assert!(registry.lookup(id).is_some());
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_retired_entry_refuses_new_runs() {
        let e = entry(2);
        {
            let _guard = e.begin().unwrap();
            assert_eq!(e.in_flight(), 1);
            // Same thread: no wait.
            e.retire(true);
        }
        assert_eq!(e.in_flight(), 0);
        assert!(e.begin().is_none());
    }

    #[test]
    fn test_retire_waits_for_other_thread() {
        let e = Arc::new(entry(3));
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);

        let runner = {
            let e = Arc::clone(&e);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                let _guard = e.begin().unwrap();
                started_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(50));
                finished.store(true, Ordering::SeqCst);
            })
        };

        started_rx.recv().unwrap();
        e.retire(true);
        assert!(finished.load(Ordering::SeqCst));
        runner.join().unwrap();
    }

    #[test]
    fn test_running_callbacks_retire_each_other_without_waiting() {
        let first = Arc::new(entry(4));
        let second = Arc::new(entry(5));
        let meet = Arc::new(std::sync::Barrier::new(2));
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        let spawn = |mine: Arc<RegistryEntry>, other: Arc<RegistryEntry>| {
            let meet = Arc::clone(&meet);
            let done_tx = done_tx.clone();
            std::thread::spawn(move || {
                let _guard = mine.begin().unwrap();
                assert!(in_callback());
                meet.wait();
                other.retire(true);
                meet.wait();
                done_tx.send(()).unwrap();
            })
        };
        let a = spawn(Arc::clone(&first), Arc::clone(&second));
        let b = spawn(Arc::clone(&second), Arc::clone(&first));

        for _ in 0..2 {
            done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        a.join().unwrap();
        b.join().unwrap();
        assert!(first.begin().is_none());
        assert!(second.begin().is_none());
        assert!(!in_callback());
    }
}
