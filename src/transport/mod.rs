//! The queue transport boundary.
//!
//! The middleware core is transport-agnostic: anything that can expose
//! per-channel send/receive with completion, dead-lettering, and session
//! affinity for [`Channel::ClientSessions`] can sit behind [`Transport`].
//! Delivery is assumed at-least-once; the dispatcher settles every
//! delivery by either completing it or dead-lettering it.
//!
//! [`memory::MemoryTransport`] is the in-process reference implementation
//! used by the test suite and for local wiring.

mod memory;

pub use memory::MemoryTransport;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use switchboard_proto::{Channel, Message};

/// Opaque per-delivery settlement token issued by a receiver.
pub type DeliveryToken = u64;

/// One received message plus the token needed to settle it.
#[derive(Debug)]
pub struct Delivery {
    /// The received envelope, `enqueued_time` stamped by the transport.
    pub message: Message,
    /// Settlement token for [`ChannelReceiver::complete`] /
    /// [`ChannelReceiver::dead_letter`].
    pub token: DeliveryToken,
}

/// A live receiver bound to one channel (or one session of the
/// session-affine channel).
#[async_trait]
pub trait ChannelReceiver: Send {
    /// Receive the next message, waiting up to `timeout`. `Ok(None)` is an
    /// idle timeout, not an error.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery as processed; the transport drops it.
    async fn complete(&mut self, token: DeliveryToken) -> Result<()>;

    /// Reject a delivery back to the transport with a reason string.
    async fn dead_letter(&mut self, token: DeliveryToken, reason: &str) -> Result<()>;

    /// Renew the session lock (session-affine receivers only; no-op
    /// elsewhere).
    async fn renew_lock(&mut self) -> Result<()>;

    /// Close the receiver and release the underlying session.
    async fn close(&mut self) -> Result<()>;
}

/// A queue transport exposing the four logical channels.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one message on `channel`. The transport stamps
    /// `enqueued_time`. Sends on [`Channel::ClientSessions`] route by the
    /// message's `target_session`.
    async fn send(&self, channel: Channel, message: Message) -> Result<()>;

    /// Send a batch. Default: sequential sends.
    async fn send_batch(&self, channel: Channel, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            self.send(channel, message).await?;
        }
        Ok(())
    }

    /// Open a receiver for a simple (non-session-affine) channel.
    async fn receiver(&self, channel: Channel) -> Result<Box<dyn ChannelReceiver>>;

    /// Accept the session for `session_id` on the session-affine channel.
    async fn accept_session(&self, session_id: &str) -> Result<Box<dyn ChannelReceiver>>;
}
