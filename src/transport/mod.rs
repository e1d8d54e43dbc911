//! Transport boundary.
//!
//! The runtime never touches the network. It hands outgoing messages to a
//! [`Transport`] and receives inbound bytes through an [`InboundSink`] it
//! registers per listener. Implementations encode with [`crate::codec`].
//!
//! [`IntraProcessTransport`] is a loopback implementation that routes within
//! the current process.

use std::sync::Arc;

use crate::message::MessageValue;
use crate::subject::Subject;
use crate::types::{Error, Result, SubscriptionId, Timeout};

mod intra;

pub use intra::IntraProcessTransport;

/// Receiver of inbound messages for one subscription.
pub trait InboundSink: Send + Sync {
    /// `subject` is the concrete subject the bytes were published on.
    fn deliver(&self, subject: &Subject, reply: Option<&Subject>, payload: &[u8]) -> Result<()>;
}

/// Outbound side of a message bus connection.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Publish on the message's send subject.
    fn send(&self, message: &MessageValue) -> Result<()>;

    /// Publish with a fresh inbox as reply subject and wait for one reply.
    fn send_request(&self, request: &MessageValue, timeout: Timeout) -> Result<MessageValue>;

    /// Publish `reply` on the reply subject of `request`.
    fn send_reply(&self, reply: &mut MessageValue, request: &MessageValue) -> Result<()> {
        let subject = request
            .reply_subject()?
            .ok_or_else(|| Error::invalid_argument("request has no reply subject"))?;
        reply.set_send_subject(subject)?;
        self.send(reply)
    }

    /// Unique subject suitable for receiving replies.
    fn create_inbox(&self) -> Result<Subject>;

    fn subscribe(&self, pattern: &Subject, sink: Arc<dyn InboundSink>) -> Result<SubscriptionId>;

    fn unsubscribe(&self, subscription: SubscriptionId) -> Result<()>;

    fn is_valid(&self) -> bool;
}
