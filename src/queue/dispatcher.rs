//! Background dispatcher threads.
//!
//! A [`Dispatcher`] owns one OS thread that loops
//! `timed_dispatch(idle_timeout)` against a single queue until it is
//! destroyed. The stop flag is rechecked on every wake, so shutdown latency is
//! bounded by the longest callback plus `idle_timeout`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::EventQueue;
use crate::types::{DispatcherConfig, Error, Result, Timeout};

/// Options for [`Runtime::create_dispatcher`](crate::Runtime::create_dispatcher).
#[derive(Debug, Clone, Default)]
pub struct DispatcherOptions {
    /// Thread name. Defaults to `<prefix>-<queue id>`.
    pub name: Option<String>,
    /// Overrides the configured idle timeout.
    pub idle_timeout: Option<Duration>,
}

impl DispatcherOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }
}

/// Owned background thread draining one [`EventQueue`].
///
/// Dropping a dispatcher destroys it.
#[derive(Debug)]
pub struct Dispatcher {
    name: String,
    queue: EventQueue,
    idle_timeout: Duration,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    worker: ThreadId,
    destroyed: bool,
}

impl Dispatcher {
    pub(crate) fn spawn(
        queue: EventQueue,
        options: DispatcherOptions,
        config: &DispatcherConfig,
    ) -> Result<Self> {
        let name = options
            .name
            .unwrap_or_else(|| format!("{}-{}", config.thread_name_prefix, queue.id()));
        let idle_timeout = options.idle_timeout.unwrap_or(config.idle_timeout);
        if idle_timeout.is_zero() {
            return Err(Error::invalid_argument("dispatcher idle_timeout must be non-zero"));
        }

        queue.bind_dispatcher()?;
        let stop = Arc::new(AtomicBool::new(false));
        let worker_queue = queue.clone();
        let worker_stop = Arc::clone(&stop);

        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || dispatch_loop(&worker_queue, &worker_stop, idle_timeout));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                queue.unbind_dispatcher();
                return Err(Error::from(e));
            }
        };

        info!("dispatcher {} started on {}", name, queue.id());
        Ok(Self {
            name,
            worker: thread.thread().id(),
            queue,
            idle_timeout,
            stop,
            thread: Some(thread),
            destroyed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn is_running(&self) -> bool {
        !self.destroyed && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the thread and release the queue.
    ///
    /// Joins the thread unless called from a callback running on it, in which
    /// case the loop exits once that callback returns.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(Error::invalid_dispatcher(format!(
                "dispatcher {} already destroyed",
                self.name
            )));
        }
        self.destroyed = true;
        self.stop.store(true, Ordering::SeqCst);

        if let Some(thread) = self.thread.take() {
            if thread::current().id() == self.worker {
                debug!("dispatcher {} destroyed from its own thread", self.name);
            } else if thread.join().is_err() {
                warn!("dispatcher {} thread panicked", self.name);
            }
        }

        self.queue.unbind_dispatcher();
        info!("dispatcher {} stopped", self.name);
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.destroyed {
            let _ = self.destroy();
        }
    }
}

fn dispatch_loop(queue: &EventQueue, stop: &AtomicBool, idle_timeout: Duration) {
    while !stop.load(Ordering::SeqCst) {
        match queue.timed_dispatch(Timeout::After(idle_timeout)) {
            Ok(()) => {}
            Err(Error::Timeout(_)) => {}
            Err(e @ (Error::InvalidQueue(_) | Error::Closed(_))) => {
                debug!("dispatcher loop on {} exiting: {}", queue.id(), e);
                break;
            }
            Err(e) => warn!("dispatch on {} failed: {}", queue.id(), e),
        }
    }
}
