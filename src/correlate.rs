//! Reply correlation engine.
//!
//! A caller that sends a request registers a wait job keyed by the sent
//! message's identifier. The system handler resolves inbound messages
//! whose `response_to` matches a job and feeds them to the waiting caller.
//! The wait itself is a straight-line `select!` race between completion,
//! deadline, and cancellation, and every exit path performs the same
//! cleanup: drop the job, drop the transient channel pin.

use crate::communicator::Communicator;
use crate::dispatch::{DispatchStatus, LabelFilter, MessageHandler};
use crate::error::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use switchboard_proto::{Channel, Message, MessageId, label};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Hard system maximum for any reply wait.
pub const MAX_WAIT: Duration = Duration::from_secs(300);

/// Substitute used when the computed wait would be zero.
pub const ZERO_WAIT_FALLBACK: Duration = Duration::from_secs(10);

/// Clamp a requested timeout against the message TTL and the system cap.
pub(crate) fn effective_timeout(requested: Option<Duration>, time_to_live: Duration) -> Duration {
    let wanted = requested.unwrap_or(time_to_live).min(MAX_WAIT);
    if wanted.is_zero() { ZERO_WAIT_FALLBACK } else { wanted }
}

/// Concurrent table of outstanding reply waits, keyed by the identifier of
/// the originating message.
#[derive(Default)]
pub struct CorrelationTable {
    jobs: DashMap<MessageId, mpsc::UnboundedSender<Message>>,
}

impl CorrelationTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for replies to `id`. The returned receiver is the
    /// caller's wake signal and reply queue in one.
    pub fn register(&self, id: MessageId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.jobs.insert(id, tx).is_some() {
            warn!(id = %id, "replaced an existing reply wait for the same message");
        }
        rx
    }

    /// Drop the wait for `id`.
    pub fn remove(&self, id: MessageId) {
        self.jobs.remove(&id);
    }

    /// Route `msg` to the job waiting on its `response_to`, if any.
    /// Returns whether the message was claimed by a waiter.
    pub fn resolve(&self, msg: &Message) -> bool {
        let Some(key) = msg.response_to else { return false };
        let Some(job) = self.jobs.get(&key) else { return false };
        if job.send(msg.clone()).is_err() {
            // Waiter already gone; treat as unclaimed so later handlers
            // get a chance, and drop the stale job.
            drop(job);
            self.jobs.remove(&key);
            return false;
        }
        true
    }

    /// Number of outstanding waits.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no waits are outstanding.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Options for [`Communicator::wait_for_replies`].
///
/// The reply channel defaults to the channel named by the sent message's
/// `reply_to_entity`; the terminator defaults to the
/// [`label::END_OF_MESSAGES`] sentinel; replies are collected unbounded
/// until terminator, cap, deadline, or cancellation.
#[derive(Default)]
pub struct WaitOptions {
    pub(crate) channel: Option<Channel>,
    pub(crate) max_replies: Option<usize>,
    pub(crate) terminator: Option<Arc<dyn Fn(&Message) -> bool + Send + Sync>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) on_reply: Option<Box<dyn FnMut(&Message) + Send>>,
}

impl WaitOptions {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait on this channel instead of resolving `reply_to_entity`.
    pub fn on_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Stop after collecting this many replies.
    pub fn max_replies(mut self, max: usize) -> Self {
        self.max_replies = Some(max);
        self
    }

    /// Predicate identifying a terminating reply. The terminating message
    /// itself is not collected.
    pub fn terminator(mut self, f: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Self {
        self.terminator = Some(Arc::new(f));
        self
    }

    /// Deadline for the whole wait. Defaults to the sent message's TTL,
    /// capped at [`MAX_WAIT`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// External cancellation signal.
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Callback invoked for each collected reply as it arrives. The
    /// terminating reply is not collected and not passed here.
    pub fn on_reply(mut self, f: impl FnMut(&Message) + Send + 'static) -> Self {
        self.on_reply = Some(Box::new(f));
        self
    }
}

/// Transient handler pinning a reply channel open for the duration of a
/// wait. Never claims anything; its presence alone raises the handler
/// count and keeps the listening loop alive.
struct ChannelPin;

#[async_trait::async_trait]
impl MessageHandler for ChannelPin {
    async fn handle(&self, _comm: &Communicator, _msg: &Message) -> Result<DispatchStatus> {
        Ok(DispatchStatus::Unhandled)
    }
}

/// Collect replies to `sent` per `options`. Errors while waiting are
/// logged, not thrown; the partial (possibly empty) result is returned.
pub(crate) async fn wait_for_replies(
    comm: &Communicator,
    sent: &Message,
    mut options: WaitOptions,
) -> Vec<Message> {
    let channel = options.channel.or_else(|| {
        sent.reply_to_entity
            .as_deref()
            .and_then(|entity| comm.config().channels.resolve(entity))
    });
    let Some(channel) = channel else {
        warn!(id = %sent.id, entity = ?sent.reply_to_entity,
            "cannot wait: reply channel unresolvable");
        return Vec::new();
    };

    let deadline = effective_timeout(options.timeout, sent.time_to_live);
    let cancel = options.cancel.take().unwrap_or_default();
    let terminator = options.terminator.take().unwrap_or_else(|| {
        Arc::new(|reply: &Message| reply.has_label(label::END_OF_MESSAGES))
    });

    let mut queue = comm.correlations().register(sent.id);
    // Keep the reply channel listened to even if no plugin handler needs
    // it right now.
    let pin_id = comm
        .add_handler_internal(channel, LabelFilter::Any, None, Arc::new(ChannelPin))
        .await;

    let mut replies = Vec::new();
    let sleep = tokio::time::sleep(deadline);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(id = %sent.id, collected = replies.len(), "reply wait cancelled");
                break;
            }
            _ = &mut sleep => {
                debug!(id = %sent.id, collected = replies.len(), "reply wait deadline passed");
                break;
            }
            received = queue.recv() => match received {
                Some(reply) => {
                    if terminator(&reply) {
                        break;
                    }
                    if let Some(callback) = options.on_reply.as_mut() {
                        callback(&reply);
                    }
                    replies.push(reply);
                    if options.max_replies.is_some_and(|max| replies.len() >= max) {
                        break;
                    }
                }
                None => {
                    warn!(id = %sent.id, "reply queue dropped mid-wait");
                    break;
                }
            }
        }
    }

    // Cleanup runs on every exit path.
    comm.correlations().remove(sent.id);
    comm.remove_handler(channel, pin_id).await;
    replies
}
