//! Built-in core plugins.
//!
//! [`server::ServerCorePlugin`] implements the authoritative side of the
//! registration and alias-ownership protocols; [`client::ClientCorePlugin`]
//! implements the calling side plus the session-channel responders every
//! participant carries (ping, lost-ownership notifications).

pub mod client;
pub mod ping;
pub mod server;

pub use client::{CLIENT_CORE, ClientCorePlugin};
pub use ping::{PingOutcome, PingReport, PingResponder, PingTarget};
pub use server::{SERVER_CORE, ServerCorePlugin};
