//! The communicator: the shared hub tying transport, dispatch,
//! correlation, listening lifecycle, plugins, and shared state together.
//!
//! `Communicator` is a cheap clonable handle over one shared core, the way
//! every component and plugin reaches the middleware. The always-present
//! system handler is installed on all four channels at construction; it
//! raises the "message received" notification and resolves reply
//! correlations before any plugin handler runs.

use crate::config::CommunicatorConfig;
use crate::correlate::{self, CorrelationTable, WaitOptions};
use crate::dispatch::listener::ListenerController;
use crate::dispatch::{DispatchStatus, HandlerId, HandlerRegistry, LabelFilter, MessageHandler};
use crate::error::{Error, Result};
use crate::plugin::{Plugin, PluginKind, PluginSet};
use crate::transport::Transport;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use switchboard_proto::{Channel, Message, prop};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Cross-cutting notification: a message passed through the communicator.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Channel the message traveled on.
    pub channel: Channel,
    /// The message itself.
    pub message: Message,
}

const EVENT_CAPACITY: usize = 64;

struct Inner {
    config: CommunicatorConfig,
    transport: Arc<dyn Transport>,
    registry: HandlerRegistry,
    correlations: CorrelationTable,
    listeners: ListenerController,
    state: DashMap<String, Arc<dyn Any + Send + Sync>>,
    sent_events: broadcast::Sender<MessageEvent>,
    received_events: broadcast::Sender<MessageEvent>,
    plugins: PluginSet,
}

/// Handle to one communicator instance. Clones share the core.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<Inner>,
}

/// The first handler checked on every channel: resolves reply
/// correlations and raises the received notification.
struct SystemHandler {
    channel: Channel,
}

#[async_trait::async_trait]
impl MessageHandler for SystemHandler {
    async fn handle(&self, comm: &Communicator, msg: &Message) -> Result<DispatchStatus> {
        comm.notify_received(self.channel, msg);
        if comm.correlations().resolve(msg) {
            Ok(DispatchStatus::Complete)
        } else {
            Ok(DispatchStatus::Unhandled)
        }
    }
}

impl Communicator {
    /// Build a communicator over `transport`. Validates the config and
    /// installs the system handler on every channel.
    pub fn new(config: CommunicatorConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let (sent_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (received_events, _) = broadcast::channel(EVENT_CAPACITY);
        let comm = Self {
            inner: Arc::new(Inner {
                config,
                transport,
                registry: HandlerRegistry::new(),
                correlations: CorrelationTable::new(),
                listeners: ListenerController::new(),
                state: DashMap::new(),
                sent_events,
                received_events,
                plugins: PluginSet::new(),
            }),
        };
        for channel in Channel::ALL {
            // Baseline of one handler per channel; does not start listening.
            comm.inner
                .registry
                .add(channel, LabelFilter::Any, None, Arc::new(SystemHandler { channel }));
        }
        Ok(comm)
    }

    /// This communicator's identity (also its session id).
    pub fn identity(&self) -> &str {
        &self.inner.config.identity
    }

    /// The active configuration.
    pub fn config(&self) -> &CommunicatorConfig {
        &self.inner.config
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn correlations(&self) -> &CorrelationTable {
        &self.inner.correlations
    }

    pub(crate) fn should_listen(&self, channel: Channel) -> bool {
        self.inner.registry.should_listen(channel)
    }

    // ------------------------------------------------------------------
    // Handler registration
    // ------------------------------------------------------------------

    pub(crate) async fn add_handler_internal(
        &self,
        channel: Channel,
        filter: LabelFilter,
        owner: Option<&'static str>,
        handler: Arc<dyn MessageHandler>,
    ) -> HandlerId {
        let id = self.inner.registry.add(channel, filter, owner, handler);
        self.inner.listeners.sync(self, channel).await;
        id
    }

    /// Register a handler on `channel`. Starts the channel's receive loop
    /// if this is the first handler beyond the system handler.
    pub async fn add_handler(
        &self,
        channel: Channel,
        filter: LabelFilter,
        handler: Arc<dyn MessageHandler>,
    ) -> HandlerId {
        self.add_handler_internal(channel, filter, None, handler).await
    }

    /// Register a handler owned by a plugin, for bulk removal at teardown.
    pub async fn add_plugin_handler(
        &self,
        channel: Channel,
        filter: LabelFilter,
        owner: PluginKind,
        handler: Arc<dyn MessageHandler>,
    ) -> HandlerId {
        self.add_handler_internal(channel, filter, Some(owner.as_str()), handler)
            .await
    }

    /// Remove a handler by id. Stops the channel's receive loop when the
    /// count falls back to the system handler alone.
    pub async fn remove_handler(&self, channel: Channel, id: HandlerId) -> bool {
        let removed = self.inner.registry.remove(channel, id);
        self.inner.listeners.sync(self, channel).await;
        removed
    }

    /// Remove every handler owned by `kind` across all channels.
    pub async fn remove_all_for_plugin(&self, kind: PluginKind) {
        self.inner.registry.remove_all_for_plugin(kind.as_str());
        for channel in Channel::ALL {
            self.inner.listeners.sync(self, channel).await;
        }
    }

    /// Hold `channel` open for listening without registering a handler.
    /// Reference-counted; pair with [`Self::unsubscribe`].
    pub async fn subscribe(&self, channel: Channel) {
        self.inner.registry.pin(channel);
        self.inner.listeners.sync(self, channel).await;
    }

    /// Release one [`Self::subscribe`] reference.
    pub async fn unsubscribe(&self, channel: Channel) {
        self.inner.registry.unpin(channel);
        self.inner.listeners.sync(self, channel).await;
    }

    /// Whether a receive loop is currently running for `channel`.
    pub fn is_listening(&self, channel: Channel) -> bool {
        self.inner.listeners.is_listening(channel)
    }

    /// Handler count on `channel`, including the system handler.
    pub fn handler_count(&self, channel: Channel) -> usize {
        self.inner.registry.handler_count(channel)
    }

    pub(crate) async fn dispatch_inbound(&self, channel: Channel, msg: &Message) -> DispatchStatus {
        self.inner.registry.dispatch(self, channel, msg).await
    }

    // ------------------------------------------------------------------
    // Send paths
    // ------------------------------------------------------------------

    /// Stamp reply addressing so receivers know where answers go: replies
    /// come back on this communicator's session of the session channel.
    fn stamp_reply_addressing(&self, msg: &mut Message) {
        if msg.reply_to_entity.is_none() {
            msg.reply_to_entity =
                Some(self.inner.config.channels.name_of(Channel::ClientSessions).to_string());
        }
        if msg.reply_to_session.is_none() {
            msg.reply_to_session = Some(self.identity().to_string());
        }
    }

    /// Mutates the caller's message in place so the copy a caller later
    /// waits on carries the same addressing the transport saw.
    async fn send_on(&self, channel: Channel, message: &mut Message) -> Result<()> {
        self.stamp_reply_addressing(message);
        trace!(channel = %channel, label = %message.label, id = %message.id, "send");
        self.inner.transport.send(channel, message.clone()).await?;
        self.notify_sent(channel, message);
        Ok(())
    }

    /// Send on the `Registrations` channel.
    pub async fn send_to_registrations(&self, message: &mut Message) -> Result<()> {
        self.send_on(Channel::Registrations, message).await
    }

    /// Send on the `ServerRequests` channel.
    pub async fn send_to_server(&self, message: &mut Message) -> Result<()> {
        self.send_on(Channel::ServerRequests, message).await
    }

    /// Send on the `Aliases` channel, addressed to `alias`.
    pub async fn send_to_alias(&self, alias: &str, message: &mut Message) -> Result<()> {
        if alias.trim().is_empty() {
            return Err(Error::InvalidInput("alias must not be blank".into()));
        }
        message.to = Some(alias.to_string());
        message.set_property(prop::TARGET_ALIAS, alias);
        self.send_on(Channel::Aliases, message).await
    }

    /// Send on the session-affine `ClientSessions` channel. The message
    /// must carry a `target_session` (replies built with
    /// [`Message::reply_to`] already do).
    pub async fn send_to_client(&self, message: &mut Message) -> Result<()> {
        if message.target_session.is_none() {
            return Err(Error::InvalidInput("send_to_client requires target_session".into()));
        }
        self.send_on(Channel::ClientSessions, message).await
    }

    /// Send a batch on one channel.
    pub async fn send_batch(&self, channel: Channel, mut messages: Vec<Message>) -> Result<()> {
        for message in &mut messages {
            self.stamp_reply_addressing(message);
        }
        self.inner.transport.send_batch(channel, messages.clone()).await?;
        for message in &messages {
            self.notify_sent(channel, message);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reply correlation
    // ------------------------------------------------------------------

    /// Wait for a single reply to `sent`. `None` on timeout or
    /// cancellation.
    pub async fn wait_for_reply(
        &self,
        sent: &Message,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Option<Message> {
        let mut options = WaitOptions::new().max_replies(1);
        if let Some(timeout) = timeout {
            options = options.timeout(timeout);
        }
        if let Some(cancel) = cancel {
            options = options.cancel(cancel);
        }
        correlate::wait_for_replies(self, sent, options)
            .await
            .into_iter()
            .next()
    }

    /// Collect replies to `sent` per `options`. Errors while waiting are
    /// logged; the partial (possibly empty) result is returned.
    pub async fn wait_for_replies(&self, sent: &Message, options: WaitOptions) -> Vec<Message> {
        correlate::wait_for_replies(self, sent, options).await
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    pub(crate) fn notify_sent(&self, channel: Channel, message: &Message) {
        let _ = self.inner.sent_events.send(MessageEvent {
            channel,
            message: message.clone(),
        });
    }

    pub(crate) fn notify_received(&self, channel: Channel, message: &Message) {
        trace!(channel = %channel, label = %message.label, id = %message.id, "received");
        let _ = self.inner.received_events.send(MessageEvent {
            channel,
            message: message.clone(),
        });
    }

    /// Subscribe to "any message sent" notifications.
    pub fn on_message_sent(&self) -> broadcast::Receiver<MessageEvent> {
        self.inner.sent_events.subscribe()
    }

    /// Subscribe to "any message received" notifications.
    pub fn on_message_received(&self) -> broadcast::Receiver<MessageEvent> {
        self.inner.received_events.subscribe()
    }

    // ------------------------------------------------------------------
    // Shared state bag
    // ------------------------------------------------------------------

    /// Store a value in the shared string-keyed state bag.
    pub fn state_set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner.state.insert(key.into(), Arc::new(value));
    }

    /// Fetch a typed value from the shared state bag.
    pub fn state_get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.inner.state.get(key)?.clone();
        value.downcast::<T>().ok()
    }

    // ------------------------------------------------------------------
    // Plugins
    // ------------------------------------------------------------------

    /// Load a plugin: insert it (duplicate kinds rejected), then run its
    /// `initialize` hook exactly once. On initialization failure the
    /// plugin is removed again.
    pub async fn load_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let kind = plugin.kind();
        self.inner.plugins.insert(plugin.clone())?;
        debug!(plugin = %kind, "plugin loading");
        if let Err(err) = plugin.initialize(self).await {
            warn!(plugin = %kind, code = err.code(), error = %err, "plugin initialization failed");
            self.inner.plugins.remove(kind);
            return Err(err);
        }
        Ok(())
    }

    /// Load several plugins in order, stopping at the first failure.
    pub async fn load_plugins(&self, plugins: Vec<Arc<dyn Plugin>>) -> Result<()> {
        for plugin in plugins {
            self.load_plugin(plugin).await?;
        }
        Ok(())
    }

    /// Look up a loaded plugin by kind (exact match, then declared
    /// capabilities).
    pub fn get_plugin(&self, kind: PluginKind) -> Option<Arc<dyn Plugin>> {
        self.inner.plugins.get(kind)
    }

    /// Tear down all plugins and stop every receive loop.
    pub async fn shutdown(&self) {
        for plugin in self.inner.plugins.all() {
            if let Err(err) = plugin.teardown(self).await {
                warn!(plugin = %plugin.kind(), code = err.code(), error = %err, "plugin teardown failed");
            }
            self.inner.plugins.remove(plugin.kind());
        }
        self.inner.listeners.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use switchboard_proto::label;

    fn comm(identity: &str) -> Communicator {
        Communicator::new(
            CommunicatorConfig::with_identity(identity),
            Arc::new(MemoryTransport::new()),
        )
        .unwrap()
    }

    struct Claiming(DispatchStatus, Arc<std::sync::atomic::AtomicUsize>);

    #[async_trait::async_trait]
    impl MessageHandler for Claiming {
        async fn handle(&self, _comm: &Communicator, _msg: &Message) -> Result<DispatchStatus> {
            self.1.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_system_handler_installed_everywhere() {
        let comm = comm("node-1");
        for channel in Channel::ALL {
            assert_eq!(comm.handler_count(channel), 1);
            assert!(!comm.is_listening(channel));
        }
    }

    #[tokio::test]
    async fn test_dispatch_short_circuits_on_complete() {
        let comm = comm("node-1");
        let first_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let second_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        comm.add_handler(
            Channel::ServerRequests,
            LabelFilter::label(label::PING),
            Arc::new(Claiming(DispatchStatus::Complete, first_calls.clone())),
        )
        .await;
        comm.add_handler(
            Channel::ServerRequests,
            LabelFilter::label(label::PING),
            Arc::new(Claiming(DispatchStatus::Complete, second_calls.clone())),
        )
        .await;

        let msg = Message::with_label(label::PING);
        let status = comm.dispatch_inbound(Channel::ServerRequests, &msg).await;
        assert_eq!(status, DispatchStatus::Complete);
        assert_eq!(first_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_faulting_handler_does_not_stop_dispatch() {
        struct Faulty;
        #[async_trait::async_trait]
        impl MessageHandler for Faulty {
            async fn handle(&self, _comm: &Communicator, _msg: &Message) -> Result<DispatchStatus> {
                Err(Error::Handler("synthetic".into()))
            }
        }

        let comm = comm("node-1");
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        comm.add_handler(Channel::Aliases, LabelFilter::Any, Arc::new(Faulty)).await;
        comm.add_handler(
            Channel::Aliases,
            LabelFilter::Any,
            Arc::new(Claiming(DispatchStatus::Handled, calls.clone())),
        )
        .await;

        let status = comm
            .dispatch_inbound(Channel::Aliases, &Message::with_label("anything"))
            .await;
        assert_eq!(status, DispatchStatus::Handled);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        comm.shutdown().await;
    }

    #[tokio::test]
    async fn test_listening_toggles_with_handler_count() {
        let comm = comm("node-1");
        assert!(!comm.is_listening(Channel::Registrations));

        let id = comm
            .add_handler(
                Channel::Registrations,
                LabelFilter::Any,
                Arc::new(Claiming(DispatchStatus::Complete, Arc::default())),
            )
            .await;
        assert!(comm.is_listening(Channel::Registrations));

        assert!(comm.remove_handler(Channel::Registrations, id).await);
        assert!(!comm.is_listening(Channel::Registrations));
    }

    #[tokio::test]
    async fn test_sync_reconciles_from_registry_state() {
        let comm = comm("node-1");

        // Mutate the registry without going through add_handler, then
        // reconcile: the controller must read the registry's current state
        // rather than trust a caller-supplied decision.
        let id = comm.inner.registry.add(
            Channel::Aliases,
            LabelFilter::Any,
            None,
            Arc::new(Claiming(DispatchStatus::Complete, Arc::default())),
        );
        comm.inner.listeners.sync(&comm, Channel::Aliases).await;
        assert!(comm.is_listening(Channel::Aliases));

        // Reconciling with nothing changed is a no-op.
        comm.inner.listeners.sync(&comm, Channel::Aliases).await;
        assert!(comm.is_listening(Channel::Aliases));

        assert!(comm.inner.registry.remove(Channel::Aliases, id));
        comm.inner.listeners.sync(&comm, Channel::Aliases).await;
        assert!(!comm.is_listening(Channel::Aliases));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_remove_keeps_loop_consistent() {
        let comm = comm("node-1");
        for _ in 0..100 {
            let id = comm
                .add_handler(
                    Channel::Aliases,
                    LabelFilter::Any,
                    Arc::new(Claiming(DispatchStatus::Complete, Arc::default())),
                )
                .await;

            // Race a remove of the old handler against an add of a new one.
            // Whichever order the transitions land in, the loop state must
            // match the registry once both are done.
            let remover = comm.clone();
            let adder = comm.clone();
            let remove = tokio::spawn(async move { remover.remove_handler(Channel::Aliases, id).await });
            let add = tokio::spawn(async move {
                adder
                    .add_handler(
                        Channel::Aliases,
                        LabelFilter::Any,
                        Arc::new(Claiming(DispatchStatus::Complete, Arc::default())),
                    )
                    .await
            });
            let (removed, added) = tokio::join!(remove, add);
            assert!(removed.unwrap());
            let survivor = added.unwrap();

            // Exactly one real handler remains: the loop must be running.
            assert_eq!(comm.handler_count(Channel::Aliases), 2);
            assert!(comm.is_listening(Channel::Aliases));

            assert!(comm.remove_handler(Channel::Aliases, survivor).await);
            assert!(!comm.is_listening(Channel::Aliases));
        }
    }

    #[tokio::test]
    async fn test_subscribe_refcount_toggles_listening() {
        let comm = comm("node-1");
        comm.subscribe(Channel::Aliases).await;
        comm.subscribe(Channel::Aliases).await;
        assert!(comm.is_listening(Channel::Aliases));

        comm.unsubscribe(Channel::Aliases).await;
        assert!(comm.is_listening(Channel::Aliases));
        comm.unsubscribe(Channel::Aliases).await;
        assert!(!comm.is_listening(Channel::Aliases));
    }

    #[tokio::test]
    async fn test_state_bag_round_trip() {
        let comm = comm("node-1");
        comm.state_set("answer", 42u32);
        assert_eq!(*comm.state_get::<u32>("answer").unwrap(), 42);
        assert!(comm.state_get::<String>("answer").is_none());
        assert!(comm.state_get::<u32>("missing").is_none());
    }

    #[tokio::test]
    async fn test_sent_notification_carries_channel() {
        let comm = comm("node-1");
        let mut sent = comm.on_message_sent();
        let mut msg = Message::with_label(label::PING);
        comm.send_to_server(&mut msg).await.unwrap();
        let event = sent.recv().await.unwrap();
        assert_eq!(event.channel, Channel::ServerRequests);
        assert!(event.message.has_label(label::PING));
        // Reply addressing was stamped on both the wire copy and ours.
        assert_eq!(event.message.reply_to_session.as_deref(), Some("node-1"));
        assert_eq!(msg.reply_to_session.as_deref(), Some("node-1"));
    }
}
