//! Wire protocol for boardsync.
//!
//! This crate defines what host and clients say to each other:
//!
//! - **Messages** ([`Message`], [`MessageType`], [`PeerId`],
//!   [`Recipient`]): the JSON objects that travel on the data channel.
//! - **Schema** ([`schema`]): the static structural table every incoming
//!   message is checked against.
//! - **Router** ([`NetworkProtocol`]): middleware chain plus
//!   prioritised handlers, shared by the host and the client.
//! - **Codec** ([`Codec`], [`JsonCodec`]): bytes ↔ values.
//!
//! ```text
//! Transport (bytes) → Codec (JSON value) → Router (typed Message) → Host / Client core
//! ```

mod codec;
mod error;
mod message;
mod router;
pub mod schema;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use message::{Message, MessageType, PeerId, Recipient};
pub use router::{Flow, Handler, HandlerError, HandlerOptions, Middleware, NetworkProtocol};
