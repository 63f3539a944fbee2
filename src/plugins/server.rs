//! Server core plugin: registration persistence, alias ownership
//! arbitration, alias-addressed forwarding, and ping response.
//!
//! All authoritative state lives in the [`RegistryStore`]; these handlers
//! are thin protocol adapters around it. Ownership races between
//! concurrent requests resolve inside the store's atomic operations, not
//! here.

use crate::communicator::Communicator;
use crate::dispatch::{DispatchStatus, LabelFilter, MessageHandler};
use crate::error::{Error, Result};
use crate::plugin::{Capability, Plugin, PluginKind};
use crate::store::RegistryStore;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_proto::{Channel, Message, label, prop};
use tracing::{debug, info, warn};

/// Kind tag of the server core plugin.
pub const SERVER_CORE: PluginKind = PluginKind("core.server");

/// Capability tag: this plugin arbitrates alias ownership.
pub const ARBITER: Capability = Capability("core.arbiter");

/// The authoritative server-side protocol plugin.
pub struct ServerCorePlugin {
    store: Arc<dyn RegistryStore>,
}

impl ServerCorePlugin {
    /// Build over the given store.
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }
}

#[async_trait::async_trait]
impl Plugin for ServerCorePlugin {
    fn kind(&self) -> PluginKind {
        SERVER_CORE
    }

    fn provides(&self) -> &'static [Capability] {
        &[ARBITER]
    }

    async fn initialize(&self, comm: &Communicator) -> Result<()> {
        comm.add_plugin_handler(
            Channel::Registrations,
            LabelFilter::label(label::REGISTRATION),
            SERVER_CORE,
            Arc::new(RegistrationHandler { store: self.store.clone() }),
        )
        .await;
        comm.add_plugin_handler(
            Channel::ServerRequests,
            LabelFilter::label(label::REQUEST_ALIAS_OWNERSHIP),
            SERVER_CORE,
            Arc::new(AliasRequestHandler { store: self.store.clone() }),
        )
        .await;
        comm.add_plugin_handler(
            Channel::ServerRequests,
            LabelFilter::label(label::DEMAND_ALIAS_OWNERSHIP),
            SERVER_CORE,
            Arc::new(AliasDemandHandler { store: self.store.clone() }),
        )
        .await;
        comm.add_plugin_handler(
            Channel::ServerRequests,
            LabelFilter::label(label::PING),
            SERVER_CORE,
            Arc::new(super::ping::PingResponder),
        )
        .await;
        comm.add_plugin_handler(
            Channel::Aliases,
            LabelFilter::Any,
            SERVER_CORE,
            Arc::new(AliasForwardHandler { store: self.store.clone() }),
        )
        .await;
        info!(identity = %comm.identity(), "server core plugin initialized");
        Ok(())
    }
}

/// The session that sent `msg`, required by every protocol here.
fn requester(msg: &Message) -> Result<&str> {
    msg.reply_to_session
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput("request without reply_to_session".into()))
}

fn nack(request: &Message, reason: &str) -> Message {
    Message::reply_to(request, label::NEGATIVE_ACKNOWLEDGE)
        .property(prop::REASON, reason)
        .property(prop::TOKEN, "")
}

struct RegistrationHandler {
    store: Arc<dyn RegistryStore>,
}

#[async_trait::async_trait]
impl MessageHandler for RegistrationHandler {
    async fn handle(&self, comm: &Communicator, msg: &Message) -> Result<DispatchStatus> {
        let identity = requester(msg)?;
        let metadata: HashMap<String, String> = msg
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        self.store.save_registration(identity, metadata)?;
        info!(identity = %identity, "registration stored");

        let mut ack = Message::reply_to(msg, label::ACKNOWLEDGE);
        comm.send_to_client(&mut ack).await?;
        Ok(DispatchStatus::Complete)
    }
}

struct AliasRequestHandler {
    store: Arc<dyn RegistryStore>,
}

#[async_trait::async_trait]
impl MessageHandler for AliasRequestHandler {
    async fn handle(&self, comm: &Communicator, msg: &Message) -> Result<DispatchStatus> {
        let candidate = requester(msg)?;
        let Some(alias) = msg.property_str(prop::ALIAS) else {
            let mut reply = nack(msg, "ownership request without alias");
            comm.send_to_client(&mut reply).await?;
            return Ok(DispatchStatus::Complete);
        };
        let token = msg.property_str(prop::TOKEN).unwrap_or("");

        let mut reply = match self.store.check_ownership(alias, token, candidate) {
            Ok(true) => {
                debug!(alias = %alias, owner = %candidate, "ownership granted");
                Message::reply_to(msg, label::ACKNOWLEDGE)
                    .property(prop::ALIAS, alias)
                    .property(prop::TOKEN, token)
            }
            Ok(false) => {
                debug!(alias = %alias, candidate = %candidate, "ownership denied");
                nack(msg, "alias owned with a different token").property(prop::ALIAS, alias)
            }
            Err(err) => nack(msg, &err.to_string()).property(prop::ALIAS, alias),
        };
        comm.send_to_client(&mut reply).await?;
        Ok(DispatchStatus::Complete)
    }
}

struct AliasDemandHandler {
    store: Arc<dyn RegistryStore>,
}

#[async_trait::async_trait]
impl MessageHandler for AliasDemandHandler {
    async fn handle(&self, comm: &Communicator, msg: &Message) -> Result<DispatchStatus> {
        let candidate = requester(msg)?;
        let Some(alias) = msg.property_str(prop::ALIAS) else {
            let mut reply = nack(msg, "ownership demand without alias");
            comm.send_to_client(&mut reply).await?;
            return Ok(DispatchStatus::Complete);
        };
        let token = msg.property_str(prop::TOKEN).unwrap_or("");

        match self.store.take_ownership(alias, token, candidate) {
            Ok(previous) => {
                let mut ack = Message::reply_to(msg, label::ACKNOWLEDGE)
                    .property(prop::ALIAS, alias)
                    .property(prop::TOKEN, token);
                comm.send_to_client(&mut ack).await?;

                // Notify the displaced owner, unless the demander displaced
                // itself.
                if let Some(previous) = previous.filter(|p| p != candidate) {
                    info!(alias = %alias, previous = %previous, owner = %candidate,
                        "ownership taken by demand");
                    let mut notice = Message::with_label(label::LOST_ALIAS_OWNERSHIP)
                        .property(prop::ALIAS, alias);
                    notice.target_session = Some(previous);
                    comm.send_to_client(&mut notice).await?;
                }
            }
            Err(err) => {
                let mut reply = nack(msg, &err.to_string()).property(prop::ALIAS, alias);
                comm.send_to_client(&mut reply).await?;
            }
        }
        Ok(DispatchStatus::Complete)
    }
}

struct AliasForwardHandler {
    store: Arc<dyn RegistryStore>,
}

#[async_trait::async_trait]
impl MessageHandler for AliasForwardHandler {
    async fn handle(&self, comm: &Communicator, msg: &Message) -> Result<DispatchStatus> {
        let alias = msg
            .property_str(prop::TARGET_ALIAS)
            .or(msg.to.as_deref())
            .ok_or_else(|| Error::InvalidInput("alias message without target alias".into()))?;

        match self.store.get_alias_owner(alias) {
            Some(owner) => {
                // Forward the original envelope unchanged (same id, same
                // reply addressing) so the owner's reply correlates back
                // to the original sender.
                let mut forwarded = msg.clone();
                forwarded.target_session = Some(owner);
                comm.send_to_client(&mut forwarded).await?;
                debug!(alias = %alias, id = %msg.id, "alias traffic forwarded");
            }
            None => {
                warn!(alias = %alias, id = %msg.id, "alias traffic for unowned alias");
                let mut reply = nack(msg, "alias not owned or invalid");
                comm.send_to_client(&mut reply).await?;
            }
        }
        Ok(DispatchStatus::Complete)
    }
}
