//! In-memory reference transport.
//!
//! Per-channel and per-session queues backed by `DashMap`, with a
//! pending-delivery table and an inspectable dead-letter list. Useful for
//! tests and for wiring client and server communicators inside one
//! process. Clones share the same queues.

use super::{ChannelReceiver, Delivery, DeliveryToken, Transport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use switchboard_proto::{Channel, Message};
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum QueueKey {
    Channel(Channel),
    Session(String),
}

#[derive(Default)]
struct Queue {
    messages: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl Queue {
    fn push(&self, message: Message) {
        self.messages.lock().push_back(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Message> {
        self.messages.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

/// A rejected delivery parked on the dead-letter list.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The rejected message.
    pub message: Message,
    /// Reason supplied at rejection time.
    pub reason: String,
}

struct Shared {
    queues: DashMap<QueueKey, Arc<Queue>>,
    pending: DashMap<DeliveryToken, Message>,
    dead: Mutex<Vec<DeadLetter>>,
    next_token: AtomicU64,
}

/// In-memory queue transport. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: DashMap::new(),
                pending: DashMap::new(),
                dead: Mutex::new(Vec::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    fn queue(&self, key: QueueKey) -> Arc<Queue> {
        self.shared
            .queues
            .entry(key)
            .or_insert_with(|| Arc::new(Queue::default()))
            .clone()
    }

    /// Snapshot of the dead-letter list.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead.lock().clone()
    }

    /// Number of messages sitting unreceived on a simple channel queue.
    pub fn queue_depth(&self, channel: Channel) -> usize {
        self.shared
            .queues
            .get(&QueueKey::Channel(channel))
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Number of messages sitting unreceived on a session queue.
    pub fn session_depth(&self, session_id: &str) -> usize {
        self.shared
            .queues
            .get(&QueueKey::Session(session_id.to_string()))
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Deliveries received but not yet completed or dead-lettered.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, channel: Channel, mut message: Message) -> Result<()> {
        let key = if channel.is_session_affine() {
            let session = message.target_session.clone().ok_or_else(|| {
                Error::InvalidInput("send on session-affine channel without target_session".into())
            })?;
            QueueKey::Session(session)
        } else {
            QueueKey::Channel(channel)
        };
        message.enqueued_time = Some(Utc::now());
        trace!(channel = %channel, label = %message.label, id = %message.id, "enqueue");
        self.queue(key).push(message);
        Ok(())
    }

    async fn receiver(&self, channel: Channel) -> Result<Box<dyn ChannelReceiver>> {
        if channel.is_session_affine() {
            return Err(Error::InvalidInput(
                "session-affine channel requires accept_session".into(),
            ));
        }
        Ok(Box::new(MemoryReceiver {
            queue: self.queue(QueueKey::Channel(channel)),
            shared: self.shared.clone(),
            closed: false,
        }))
    }

    async fn accept_session(&self, session_id: &str) -> Result<Box<dyn ChannelReceiver>> {
        Ok(Box::new(MemoryReceiver {
            queue: self.queue(QueueKey::Session(session_id.to_string())),
            shared: self.shared.clone(),
            closed: false,
        }))
    }
}

struct MemoryReceiver {
    queue: Arc<Queue>,
    shared: Arc<Shared>,
    closed: bool,
}

#[async_trait]
impl ChannelReceiver for MemoryReceiver {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Delivery>> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            // Create the notified future before checking the queue so a
            // concurrent push cannot slip between check and await.
            let notified = self.queue.notify.notified();
            if let Some(message) = self.queue.pop() {
                let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
                self.shared.pending.insert(token, message.clone());
                return Ok(Some(Delivery { message, token }));
            }
            tokio::select! {
                _ = notified => {}
                _ = &mut deadline => return Ok(None),
            }
        }
    }

    async fn complete(&mut self, token: DeliveryToken) -> Result<()> {
        self.shared.pending.remove(&token);
        Ok(())
    }

    async fn dead_letter(&mut self, token: DeliveryToken, reason: &str) -> Result<()> {
        if let Some((_, message)) = self.shared.pending.remove(&token) {
            trace!(id = %message.id, reason = %reason, "dead-letter");
            self.shared.dead.lock().push(DeadLetter {
                message,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    async fn renew_lock(&mut self) -> Result<()> {
        // Sessions never expire in the in-memory transport.
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
