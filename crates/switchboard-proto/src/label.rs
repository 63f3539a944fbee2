//! Well-known message labels and the label comparison rule.
//!
//! Labels are routing/intent tags. Comparison is always trimmed,
//! ASCII-case-insensitive equality — `" ping "` matches `"PING"`.

/// Client registration request.
pub const REGISTRATION: &str = "Registration";

/// Non-forceful alias ownership request.
pub const REQUEST_ALIAS_OWNERSHIP: &str = "Request Alias Ownership";

/// Forceful alias ownership takeover.
pub const DEMAND_ALIAS_OWNERSHIP: &str = "Demand Alias Ownership";

/// Notification to a displaced alias owner.
pub const LOST_ALIAS_OWNERSHIP: &str = "Lost Alias Ownership";

/// Ping diagnostic request.
pub const PING: &str = "Ping";

/// Ping diagnostic reply.
pub const PING_RESPONSE: &str = "Ping Response";

/// Positive acknowledgment.
pub const ACKNOWLEDGE: &str = "Acknowledge";

/// Negative acknowledgment (business-level rejection, reason attached).
pub const NEGATIVE_ACKNOWLEDGE: &str = "Negative Acknowledge";

/// Terminating sentinel for multi-reply conversations.
pub const END_OF_MESSAGES: &str = "End Of Messages";

/// Compare two labels: trimmed, ASCII-case-insensitive equality.
pub fn matches(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
