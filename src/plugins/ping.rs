//! Ping diagnostics: shared responder and the caller-side report types.
//!
//! A responder answers `Ping` with `Ping Response`, echoing its identity
//! and the request's enqueue timestamp so the caller can compute both
//! round-trip time and queueing delay.

use crate::communicator::Communicator;
use crate::dispatch::{DispatchStatus, MessageHandler};
use crate::error::{Error, Result};
use chrono::DateTime;
use std::time::Duration;
use switchboard_proto::{Message, label, prop};
use tracing::debug;

/// Where a ping is aimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingTarget {
    /// The coordinating server, over `ServerRequests`.
    Server,
    /// Whatever client currently owns the alias, via server forwarding.
    Alias(String),
    /// A specific client session, directly over `ClientSessions`.
    Client(String),
}

/// Classified result of one ping call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// A `Ping Response` arrived within the deadline.
    Success,
    /// No reply within the deadline.
    Timeout,
    /// A negative acknowledgment arrived instead of a response
    /// (e.g. the target alias is unowned).
    AddresseeNotFound,
    /// A local failure before a reply could be awaited.
    Exception,
}

/// Everything a ping call learned.
#[derive(Debug)]
pub struct PingReport {
    /// Classified outcome.
    pub outcome: PingOutcome,
    /// Wall-clock round trip, on success.
    pub round_trip: Option<Duration>,
    /// Response enqueue time minus request enqueue time, on success and
    /// when both timestamps were available.
    pub queue_delay: Option<chrono::Duration>,
    /// Identity that served the ping, on success.
    pub served_by: Option<String>,
    /// Reason string from a negative acknowledgment, if one arrived.
    pub reason: Option<String>,
    /// Captured local error, on [`PingOutcome::Exception`].
    pub error: Option<Error>,
}

impl PingReport {
    pub(crate) fn outcome(outcome: PingOutcome) -> Self {
        Self {
            outcome,
            round_trip: None,
            queue_delay: None,
            served_by: None,
            reason: None,
            error: None,
        }
    }

    pub(crate) fn exception(error: Error) -> Self {
        let mut report = Self::outcome(PingOutcome::Exception);
        report.error = Some(error);
        report
    }

    /// Re-throw a captured local error, passing the report through
    /// otherwise.
    pub fn rethrow(self) -> Result<Self> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Handler answering `Ping` on behalf of the local identity.
pub struct PingResponder;

#[async_trait::async_trait]
impl MessageHandler for PingResponder {
    async fn handle(&self, comm: &Communicator, msg: &Message) -> Result<DispatchStatus> {
        if msg.reply_to_session.is_none() {
            return Err(Error::InvalidInput("ping without reply_to_session".into()));
        }
        let mut reply = Message::reply_to(msg, label::PING_RESPONSE);
        reply.set_property(prop::SERVED_BY, comm.identity());
        if let Some(enqueued) = msg.enqueued_time {
            reply.set_property(prop::REQUEST_ENQUEUED_TIME, enqueued.to_rfc3339());
        }
        comm.send_to_client(&mut reply).await?;
        debug!(id = %msg.id, from = ?msg.reply_to_session, "ping answered");
        Ok(DispatchStatus::Complete)
    }
}

/// Queueing delay: response enqueue time minus the echoed request enqueue
/// time, when both are present.
pub(crate) fn queue_delay(reply: &Message) -> Option<chrono::Duration> {
    let response_enqueued = reply.enqueued_time?;
    let request_enqueued = reply
        .property_str(prop::REQUEST_ENQUEUED_TIME)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())?;
    Some(response_enqueued.signed_duration_since(request_enqueued))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_queue_delay_requires_both_timestamps() {
        let mut reply = Message::with_label(label::PING_RESPONSE);
        assert!(queue_delay(&reply).is_none());

        let enqueued = Utc::now();
        reply.enqueued_time = Some(enqueued);
        assert!(queue_delay(&reply).is_none());

        reply.set_property(
            prop::REQUEST_ENQUEUED_TIME,
            (enqueued - chrono::Duration::milliseconds(250)).to_rfc3339(),
        );
        let delay = queue_delay(&reply).unwrap();
        assert_eq!(delay, chrono::Duration::milliseconds(250));
    }

    #[test]
    fn test_rethrow_passes_clean_reports_through() {
        let report = PingReport::outcome(PingOutcome::Timeout);
        assert!(report.rethrow().is_ok());

        let report = PingReport::exception(Error::InvalidInput("bad target".into()));
        assert!(report.rethrow().is_err());
    }
}
