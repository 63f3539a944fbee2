//! Telemetry utilities: subscriber setup and standardized spans.

use tracing::{Span, info_span};
use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber honoring `RUST_LOG`.
///
/// Opt-in: library code only emits events through the `tracing` facade and
/// never installs a subscriber on its own. Safe to call more than once;
/// later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Standardized span constructors for middleware observability.
pub mod spans {
    use super::*;
    use switchboard_proto::Channel;

    /// Span for one channel receive loop.
    pub fn listener(identity: &str, channel: Channel) -> Span {
        info_span!("listener", identity = %identity, channel = %channel)
    }

    /// Span for one protocol call (register, request alias, ping, ...).
    pub fn call(identity: &str, operation: &str) -> Span {
        info_span!("call", identity = %identity, operation = %operation)
    }
}
