//! Well-known property keys used by the built-in protocols.

/// Alias name carried by ownership requests/demands and loss notifications.
pub const ALIAS: &str = "alias";

/// Ownership token proposed by a requester or echoed back by the server.
pub const TOKEN: &str = "token";

/// Target alias carried by messages sent on the `Aliases` channel.
pub const TARGET_ALIAS: &str = "target-alias";

/// Reason string attached to negative acknowledgments.
pub const REASON: &str = "reason";

/// Identity of the party that served a ping.
pub const SERVED_BY: &str = "served-by";

/// Enqueue timestamp of the ping request, echoed on the response
/// (RFC 3339) so the caller can compute queueing delay.
pub const REQUEST_ENQUEUED_TIME: &str = "request-enqueued-time";

/// Wall-clock send timestamp stamped on outbound pings (RFC 3339).
pub const PING_SENT_TIME: &str = "ping-sent-time";
