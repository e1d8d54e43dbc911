//! In-process loopback transport.
//!
//! Subscriptions live in a map guarded by an `RwLock`. `send` encodes the
//! message once, collects the matching sinks under the read lock, releases it
//! and then delivers, so sinks may subscribe, unsubscribe or send again from
//! inside `deliver`.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::{InboundSink, Transport};
use crate::codec;
use crate::message::MessageValue;
use crate::subject::Subject;
use crate::types::{Error, Result, SubscriptionId, Timeout, TransportConfig};

struct Subscription {
    pattern: Subject,
    sink: Arc<dyn InboundSink>,
}

struct Inner {
    config: TransportConfig,
    session: Uuid,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_subscription: AtomicU64,
    next_inbox: AtomicU64,
    valid: AtomicBool,
}

/// Loopback [`Transport`]. Clones share the same subscription table.
#[derive(Clone)]
pub struct IntraProcessTransport {
    inner: Arc<Inner>,
}

impl IntraProcessTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                session: Uuid::new_v4(),
                subscriptions: RwLock::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                next_inbox: AtomicU64::new(1),
                valid: AtomicBool::new(true),
            }),
        }
    }

    /// Invalidate the transport and drop every subscription.
    pub fn destroy(&self) {
        self.inner.valid.store(false, Ordering::SeqCst);
        let dropped = {
            let mut subs = self.inner.subscriptions.write();
            let n = subs.len();
            subs.clear();
            n
        };
        debug!("transport {} destroyed, {} subscriptions dropped", self.inner.session, dropped);
    }

    /// `send_request` with the configured default request timeout.
    pub fn request(&self, request: &MessageValue) -> Result<MessageValue> {
        self.send_request(
            request,
            Timeout::After(self.inner.config.default_request_timeout),
        )
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    fn ensure_valid(&self) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::invalid_transport("transport has been destroyed"));
        }
        Ok(())
    }
}

impl Default for IntraProcessTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl fmt::Debug for IntraProcessTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntraProcessTransport")
            .field("session", &self.inner.session)
            .field("subscriptions", &self.subscription_count())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Transport for IntraProcessTransport {
    fn send(&self, message: &MessageValue) -> Result<()> {
        self.ensure_valid()?;
        let subject = message
            .send_subject_ref()
            .cloned()
            .ok_or_else(|| Error::invalid_argument("message has no send subject"))?;
        let reply = message.reply_subject_ref().cloned();

        let bytes = codec::encode(message)?;
        if bytes.len() > self.inner.config.max_message_bytes {
            return Err(Error::invalid_argument(format!(
                "encoded message is {} bytes, limit is {}",
                bytes.len(),
                self.inner.config.max_message_bytes
            )));
        }

        let sinks: Vec<Arc<dyn InboundSink>> = self
            .inner
            .subscriptions
            .read()
            .values()
            .filter(|s| s.pattern.matches(&subject))
            .map(|s| Arc::clone(&s.sink))
            .collect();

        for sink in &sinks {
            if let Err(e) = sink.deliver(&subject, reply.as_ref(), &bytes) {
                warn!("delivery on {} failed: {}", subject, e);
            }
        }
        Ok(())
    }

    fn send_request(&self, request: &MessageValue, timeout: Timeout) -> Result<MessageValue> {
        self.ensure_valid()?;
        let inbox = self.create_inbox()?;
        let (tx, rx) = bounded(1);
        let subscription = self.subscribe(&inbox, Arc::new(ReplySink { tx }))?;

        let result = MessageValue::create_copy(request)
            .and_then(|mut outgoing| {
                outgoing.set_reply_subject(inbox.as_str())?;
                self.send(&outgoing)
            })
            .and_then(|()| match timeout {
                Timeout::NoWait => rx.try_recv().map_err(|e| match e {
                    TryRecvError::Empty => Error::timeout(format!("no reply on {}", inbox)),
                    TryRecvError::Disconnected => Error::invalid_transport("reply channel closed"),
                }),
                Timeout::WaitForever => rx
                    .recv()
                    .map_err(|_| Error::invalid_transport("reply channel closed")),
                Timeout::After(d) => rx.recv_timeout(d).map_err(|e| match e {
                    RecvTimeoutError::Timeout => {
                        Error::timeout(format!("no reply on {} within {:?}", inbox, d))
                    }
                    RecvTimeoutError::Disconnected => {
                        Error::invalid_transport("reply channel closed")
                    }
                }),
            });

        if let Err(e) = self.unsubscribe(subscription) {
            debug!("inbox {} already gone: {}", inbox, e);
        }
        result
    }

    fn create_inbox(&self) -> Result<Subject> {
        let n = self.inner.next_inbox.fetch_add(1, Ordering::Relaxed);
        Subject::publishable(&format!(
            "{}.{}.{}",
            self.inner.config.inbox_prefix,
            self.inner.session.simple(),
            n
        ))
    }

    fn subscribe(&self, pattern: &Subject, sink: Arc<dyn InboundSink>) -> Result<SubscriptionId> {
        self.ensure_valid()?;
        let id = SubscriptionId::new(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.subscriptions.write().insert(
            id,
            Subscription {
                pattern: pattern.clone(),
                sink,
            },
        );
        debug!("{} subscribed to {}", id, pattern);
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<()> {
        match self.inner.subscriptions.write().remove(&subscription) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(format!("{} is not subscribed", subscription))),
        }
    }

    fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }
}

/// Single-shot sink used by `send_request`.
struct ReplySink {
    tx: Sender<MessageValue>,
}

impl InboundSink for ReplySink {
    fn deliver(&self, _subject: &Subject, _reply: Option<&Subject>, payload: &[u8]) -> Result<()> {
        let reply = codec::decode(payload)?;
        // A second reply finds the channel full and is dropped.
        let _ = self.tx.try_send(reply);
        Ok(())
    }
}
