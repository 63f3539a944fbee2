//! # switchboard
//!
//! Message-oriented middleware over at-least-once queue transports:
//! independent processes register with a coordinating server over four
//! logical channels, negotiate ownership of human-readable aliases, and
//! exchange correlated request/reply traffic.
//!
//! The core is the dispatch, correlation, and ownership-arbitration
//! engine:
//!
//! - [`dispatch`] — per-channel ordered handler tables with
//!   short-circuit dispatch and a listening lifecycle that starts and
//!   stops receive loops as handlers come and go;
//! - [`correlate`] — outstanding request/reply waits with deadline,
//!   cancellation, and multi-reply collection;
//! - [`plugin`] — the composition unit attaching handlers to a
//!   [`Communicator`];
//! - [`plugins`] — the built-in client/server protocol plugins
//!   (registration, alias ownership with forceful takeover, ping);
//! - [`store`] — the authoritative registration/alias state;
//! - [`transport`] — the queue transport boundary plus the in-memory
//!   reference implementation.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchboard::config::CommunicatorConfig;
//! use switchboard::plugins::{ClientCorePlugin, ServerCorePlugin};
//! use switchboard::store::MemoryStore;
//! use switchboard::transport::MemoryTransport;
//! use switchboard::Communicator;
//!
//! # async fn demo() -> switchboard::Result<()> {
//! let transport = Arc::new(MemoryTransport::new());
//!
//! let server = Communicator::new(CommunicatorConfig::with_identity("server"), transport.clone())?;
//! server.load_plugin(Arc::new(ServerCorePlugin::new(Arc::new(MemoryStore::new())))).await?;
//!
//! let client = Communicator::new(CommunicatorConfig::with_identity("client-a"), transport)?;
//! let core = Arc::new(ClientCorePlugin::new());
//! client.load_plugin(core.clone()).await?;
//!
//! core.register(&client, Default::default()).await?;
//! let granted = core.request_ownership(&client, "UK123", "token-1").await?;
//! assert_eq!(granted, "token-1");
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod communicator;
pub mod config;
pub mod correlate;
pub mod dispatch;
pub mod error;
pub mod plugin;
pub mod plugins;
pub mod store;
pub mod telemetry;
pub mod transport;

pub use communicator::{Communicator, MessageEvent};
pub use correlate::WaitOptions;
pub use dispatch::{DispatchStatus, HandlerId, LabelFilter, MessageHandler};
pub use error::{Error, Result};
pub use plugin::{Capability, Plugin, PluginKind};
pub use switchboard_proto::{Channel, Message, MessageId, PropertyValue, label, prop};
