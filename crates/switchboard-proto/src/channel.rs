//! The closed set of logical channels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical channel of the middleware layer.
///
/// The set is closed: every message travels on exactly one of these four
/// channels, and channel identity never changes at runtime.
/// `ClientSessions` is session-affine (one logical session per client
/// identity); the other three are simple queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Client registration requests flowing to the server.
    Registrations,
    /// General requests addressed to the server (alias arbitration, ping).
    ServerRequests,
    /// Alias-addressed traffic, forwarded by the server to the owner.
    Aliases,
    /// Per-client session traffic (replies, notifications, direct sends).
    ClientSessions,
}

impl Channel {
    /// All channels, in fixed iteration order.
    pub const ALL: [Channel; 4] = [
        Channel::Registrations,
        Channel::ServerRequests,
        Channel::Aliases,
        Channel::ClientSessions,
    ];

    /// Canonical entity name used when no custom name is configured.
    pub const fn canonical_name(self) -> &'static str {
        match self {
            Channel::Registrations => "registrations",
            Channel::ServerRequests => "serverrequests",
            Channel::Aliases => "aliases",
            Channel::ClientSessions => "clientsessions",
        }
    }

    /// Whether this channel uses per-client session affinity.
    pub const fn is_session_affine(self) -> bool {
        matches!(self, Channel::ClientSessions)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}
