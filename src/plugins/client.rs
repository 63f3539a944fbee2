//! Client core plugin: registration, alias ownership calls, ping, and the
//! session-channel responders every client carries.
//!
//! Loading this plugin keeps the client's own session listened to, so
//! lost-ownership notifications and direct pings arrive even while no
//! call is in flight.

use super::ping::{self, PingOutcome, PingReport, PingResponder, PingTarget};
use crate::communicator::Communicator;
use crate::dispatch::{DispatchStatus, LabelFilter, MessageHandler};
use crate::error::{Error, Result};
use crate::plugin::{Plugin, PluginKind};
use crate::telemetry;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchboard_proto::{Channel, Message, label, prop};
use tokio::sync::broadcast;
use tracing::{Instrument, debug};

/// Kind tag of the client core plugin.
pub const CLIENT_CORE: PluginKind = PluginKind("core.client");

const OWNERSHIP_EVENT_CAPACITY: usize = 16;

/// The calling side of the registration, alias, and ping protocols.
pub struct ClientCorePlugin {
    ownership_lost: broadcast::Sender<String>,
}

impl Default for ClientCorePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCorePlugin {
    /// Fresh plugin instance.
    pub fn new() -> Self {
        let (ownership_lost, _) = broadcast::channel(OWNERSHIP_EVENT_CAPACITY);
        Self { ownership_lost }
    }

    /// Observe aliases this client is forcibly displaced from.
    pub fn subscribe_ownership_lost(&self) -> broadcast::Receiver<String> {
        self.ownership_lost.subscribe()
    }

    /// Register this client's identity and metadata with the server and
    /// wait for the acknowledgment.
    pub async fn register(
        &self,
        comm: &Communicator,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let span = telemetry::spans::call(comm.identity(), "register");
        async {
            let mut msg = Message::with_label(label::REGISTRATION);
            for (key, value) in metadata {
                msg.set_property(key, value);
            }
            comm.send_to_registrations(&mut msg).await?;

            let reply = comm
                .wait_for_reply(&msg, Some(comm.config().ping_timeout), None)
                .await
                .ok_or(Error::Timeout)?;
            if reply.has_label(label::ACKNOWLEDGE) {
                debug!("registration acknowledged");
                Ok(())
            } else {
                Err(Error::nack(
                    reply.property_str(prop::REASON).unwrap_or("registration rejected"),
                ))
            }
        }
        .instrument(span)
        .await
    }

    /// Non-forceful alias ownership request. Returns the granted token
    /// echoed by the server, or the empty string when denied.
    pub async fn request_ownership(
        &self,
        comm: &Communicator,
        alias: &str,
        token: &str,
    ) -> Result<String> {
        self.ownership_call(comm, label::REQUEST_ALIAS_OWNERSHIP, alias, token)
            .await
    }

    /// Forceful takeover. Always succeeds against a running server; the
    /// displaced owner, if any, is notified out of band.
    pub async fn demand_ownership(
        &self,
        comm: &Communicator,
        alias: &str,
        token: &str,
    ) -> Result<String> {
        self.ownership_call(comm, label::DEMAND_ALIAS_OWNERSHIP, alias, token)
            .await
    }

    async fn ownership_call(
        &self,
        comm: &Communicator,
        call_label: &str,
        alias: &str,
        token: &str,
    ) -> Result<String> {
        let span = telemetry::spans::call(comm.identity(), call_label);
        async {
            let mut msg = Message::with_label(call_label)
                .property(prop::ALIAS, alias)
                .property(prop::TOKEN, token);
            comm.send_to_server(&mut msg).await?;

            let reply = comm
                .wait_for_reply(&msg, Some(comm.config().ping_timeout), None)
                .await
                .ok_or(Error::Timeout)?;
            // Denials come back as a negative acknowledgment carrying the
            // empty token, which is exactly what we hand the caller.
            Ok(reply.property_str(prop::TOKEN).unwrap_or("").to_string())
        }
        .instrument(span)
        .await
    }

    /// Ping a target and classify the outcome. Never returns an error;
    /// local failures are captured in the report and can be re-thrown via
    /// [`PingReport::rethrow`].
    pub async fn ping(
        &self,
        comm: &Communicator,
        target: PingTarget,
        timeout: Option<Duration>,
    ) -> PingReport {
        let deadline = timeout.unwrap_or(comm.config().ping_timeout);
        let started = Instant::now();

        let mut msg = Message::with_label(label::PING);
        msg.set_property(prop::PING_SENT_TIME, Utc::now().to_rfc3339());

        let sent = match &target {
            PingTarget::Server => comm.send_to_server(&mut msg).await,
            PingTarget::Alias(alias) => comm.send_to_alias(alias, &mut msg).await,
            PingTarget::Client(session) => {
                msg.target_session = Some(session.clone());
                comm.send_to_client(&mut msg).await
            }
        };
        if let Err(err) = sent {
            return PingReport::exception(err);
        }

        match comm.wait_for_reply(&msg, Some(deadline), None).await {
            None => PingReport::outcome(PingOutcome::Timeout),
            Some(reply) if reply.has_label(label::PING_RESPONSE) => {
                let mut report = PingReport::outcome(PingOutcome::Success);
                report.round_trip = Some(started.elapsed());
                report.queue_delay = ping::queue_delay(&reply);
                report.served_by = reply.property_str(prop::SERVED_BY).map(str::to_string);
                report
            }
            Some(reply) if reply.has_label(label::NEGATIVE_ACKNOWLEDGE) => {
                let mut report = PingReport::outcome(PingOutcome::AddresseeNotFound);
                report.reason = reply.property_str(prop::REASON).map(str::to_string);
                report
            }
            Some(reply) => PingReport::exception(Error::Transport(format!(
                "unexpected ping reply label: {}",
                reply.label
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Plugin for ClientCorePlugin {
    fn kind(&self) -> PluginKind {
        CLIENT_CORE
    }

    async fn initialize(&self, comm: &Communicator) -> Result<()> {
        comm.add_plugin_handler(
            Channel::ClientSessions,
            LabelFilter::label(label::LOST_ALIAS_OWNERSHIP),
            CLIENT_CORE,
            Arc::new(LostOwnershipHandler { events: self.ownership_lost.clone() }),
        )
        .await;
        comm.add_plugin_handler(
            Channel::ClientSessions,
            LabelFilter::label(label::PING),
            CLIENT_CORE,
            Arc::new(PingResponder),
        )
        .await;
        debug!(identity = %comm.identity(), "client core plugin initialized");
        Ok(())
    }
}

struct LostOwnershipHandler {
    events: broadcast::Sender<String>,
}

#[async_trait::async_trait]
impl MessageHandler for LostOwnershipHandler {
    async fn handle(&self, _comm: &Communicator, msg: &Message) -> Result<DispatchStatus> {
        let alias = msg
            .property_str(prop::ALIAS)
            .ok_or_else(|| Error::InvalidInput("ownership loss without alias".into()))?;
        debug!(alias = %alias, "alias ownership lost");
        // No subscribers is fine; the event is advisory.
        let _ = self.events.send(alias.to_string());
        Ok(DispatchStatus::Complete)
    }
}
