//! # switchboard-proto
//!
//! Wire types for the switchboard middleware layer: the message envelope,
//! the closed set of logical channels, and the well-known labels and
//! property keys of the built-in protocols.
//!
//! This crate carries no runtime. Everything here is plain data with serde
//! derives so that transports can serialize envelopes however they like.
//!
//! ## Quick Start
//!
//! ```rust
//! use switchboard_proto::{label, Message};
//!
//! let request = Message::with_label(label::PING)
//!     .property("origin", "client-7");
//!
//! let reply = Message::reply_to(&request, label::PING_RESPONSE);
//! assert_eq!(reply.response_to, Some(request.id));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod channel;
pub mod label;
pub mod message;
pub mod prop;

pub use channel::Channel;
pub use message::{Message, MessageId, PropertyValue};
