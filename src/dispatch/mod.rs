//! Handler registry and dispatcher.
//!
//! Each channel owns an ordered table of handlers. A message runs through
//! the table in registration order until a handler claims it; the terminal
//! status decides whether the delivery is completed or dead-lettered.
//! Handlers are addressed by stable [`HandlerId`]s so removal never relies
//! on reference equality.

pub mod listener;

use crate::communicator::Communicator;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use switchboard_proto::{Channel, Message, label};
use tracing::{debug, error, warn};

/// Outcome a handler reports for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Not claimed; the next handler gets a chance.
    Unhandled,
    /// Claimed, but the delivery is not marked for deletion.
    Handled,
    /// Claimed and marked for deletion: the delivery is completed on the
    /// transport.
    Complete,
}

impl DispatchStatus {
    /// Whether this status claims the message (stops iteration).
    pub fn claims(self) -> bool {
        !matches!(self, DispatchStatus::Unhandled)
    }

    /// Whether the delivery should be acknowledged on the transport.
    pub fn marked_for_deletion(self) -> bool {
        matches!(self, DispatchStatus::Complete)
    }
}

/// A handler attached to one channel.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message. Return [`DispatchStatus::Unhandled`] to pass it
    /// on to the next handler in registration order.
    async fn handle(&self, comm: &Communicator, msg: &Message) -> Result<DispatchStatus>;

    /// Called with the message and the error when [`Self::handle`] fails.
    /// The dispatch loop continues regardless.
    async fn on_error(&self, _comm: &Communicator, _msg: &Message, _error: &Error) {}
}

/// Restricts which labels a handler sees.
#[derive(Clone)]
pub enum LabelFilter {
    /// Every message on the channel.
    Any,
    /// Only messages whose label matches (trimmed, case-insensitive).
    Label(String),
    /// Arbitrary predicate. A panicking predicate is caught, logged, and
    /// treated as "does not match".
    Predicate(Arc<dyn Fn(&Message) -> bool + Send + Sync>),
}

impl LabelFilter {
    /// Filter for one well-known label.
    pub fn label(value: impl Into<String>) -> Self {
        LabelFilter::Label(value.into())
    }

    fn matches(&self, msg: &Message) -> bool {
        match self {
            LabelFilter::Any => true,
            LabelFilter::Label(wanted) => label::matches(&msg.label, wanted),
            LabelFilter::Predicate(predicate) => {
                match catch_unwind(AssertUnwindSafe(|| predicate(msg))) {
                    Ok(matched) => matched,
                    Err(_) => {
                        warn!(id = %msg.id, "label predicate panicked; treating as no match");
                        false
                    }
                }
            }
        }
    }
}

impl fmt::Debug for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelFilter::Any => f.write_str("Any"),
            LabelFilter::Label(l) => f.debug_tuple("Label").field(l).finish(),
            LabelFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Stable identifier for a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct HandlerEntry {
    id: HandlerId,
    filter: LabelFilter,
    handler: Arc<dyn MessageHandler>,
    /// Owning plugin tag, used only for bulk removal on plugin teardown.
    owner: Option<&'static str>,
}

#[derive(Default)]
struct ChannelTable {
    entries: Vec<HandlerEntry>,
    /// Subscriptions holding the channel open without a handler.
    pins: usize,
}

impl ChannelTable {
    /// Listening threshold: the always-present system handler alone does
    /// not warrant a receive loop.
    fn should_listen(&self) -> bool {
        self.entries.len() + self.pins > 1
    }
}

/// Per-channel ordered handler tables. All mutation is serialized behind
/// one mutex per channel; dispatch works on a snapshot so handlers may
/// add or remove handlers while messages are in flight.
pub struct HandlerRegistry {
    tables: [Mutex<ChannelTable>; 4],
    next_id: AtomicU64,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            tables: std::array::from_fn(|_| Mutex::new(ChannelTable::default())),
            next_id: AtomicU64::new(1),
        }
    }

    fn table(&self, channel: Channel) -> &Mutex<ChannelTable> {
        let index = Channel::ALL
            .iter()
            .position(|c| *c == channel)
            .expect("channel in closed set");
        &self.tables[index]
    }

    /// Append a handler, returning its id.
    pub fn add(
        &self,
        channel: Channel,
        filter: LabelFilter,
        owner: Option<&'static str>,
        handler: Arc<dyn MessageHandler>,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut table = self.table(channel).lock();
        table.entries.push(HandlerEntry { id, filter, handler, owner });
        debug!(channel = %channel, handler = id.0, count = table.entries.len(), "handler added");
        id
    }

    /// Remove a handler by id; returns whether it existed.
    pub fn remove(&self, channel: Channel, id: HandlerId) -> bool {
        let mut table = self.table(channel).lock();
        let before = table.entries.len();
        table.entries.retain(|e| e.id != id);
        table.entries.len() != before
    }

    /// Remove every handler owned by `plugin`, on every channel.
    pub fn remove_all_for_plugin(&self, plugin: &'static str) {
        for channel in Channel::ALL {
            self.table(channel).lock().entries.retain(|e| e.owner != Some(plugin));
        }
    }

    /// Reference-counted "keep listening" subscription.
    pub fn pin(&self, channel: Channel) {
        self.table(channel).lock().pins += 1;
    }

    /// Drop one subscription taken with [`Self::pin`].
    pub fn unpin(&self, channel: Channel) {
        let mut table = self.table(channel).lock();
        table.pins = table.pins.saturating_sub(1);
    }

    /// Whether `channel` currently warrants a receive loop. The listening
    /// controller reads this under its own slot lock so the decision it
    /// applies is never older than the one it was called for.
    pub fn should_listen(&self, channel: Channel) -> bool {
        self.table(channel).lock().should_listen()
    }

    /// Handler count (pins excluded), mostly for diagnostics and tests.
    pub fn handler_count(&self, channel: Channel) -> usize {
        self.table(channel).lock().entries.len()
    }

    fn snapshot(&self, channel: Channel) -> Vec<(HandlerId, LabelFilter, Arc<dyn MessageHandler>)> {
        self.table(channel)
            .lock()
            .entries
            .iter()
            .map(|e| (e.id, e.filter.clone(), e.handler.clone()))
            .collect()
    }

    /// Run one inbound message through the channel's handlers in
    /// registration order and return the terminal status.
    ///
    /// Handler faults are isolated: logged, routed to the handler's
    /// `on_error` hook, and treated as non-claiming.
    pub async fn dispatch(
        &self,
        comm: &Communicator,
        channel: Channel,
        msg: &Message,
    ) -> DispatchStatus {
        let entries = self.snapshot(channel);
        if entries.is_empty() {
            // The system handler is installed on every channel at
            // construction, so an empty table is an internal invariant
            // violation, not a routine miss.
            error!(channel = %channel, id = %msg.id, "invariant violated: dispatch with no handlers");
            return DispatchStatus::Unhandled;
        }

        for (index, (id, filter, handler)) in entries.iter().enumerate() {
            if !filter.matches(msg) {
                continue;
            }
            match handler.handle(comm, msg).await {
                Ok(DispatchStatus::Unhandled) => continue,
                Ok(status) => {
                    debug!(channel = %channel, id = %msg.id, handler = id.0, ?status, "claimed");
                    return status;
                }
                Err(err) => {
                    // Index 0 is the system handler; its failures are
                    // internal faults and get the loud treatment.
                    if index == 0 {
                        error!(channel = %channel, id = %msg.id, code = err.code(), error = %err,
                            "system handler fault");
                    } else {
                        warn!(channel = %channel, id = %msg.id, handler = id.0, code = err.code(),
                            error = %err, "handler fault; continuing");
                    }
                    handler.on_error(comm, msg, &err).await;
                }
            }
        }
        DispatchStatus::Unhandled
    }
}
