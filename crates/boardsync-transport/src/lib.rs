//! Data channels between peers.
//!
//! Above this crate a link is an ordered, reliable pipe of byte messages
//! that eventually reports "closed". [`Connection`] is that pipe. The host
//! takes incoming links from a [`Transport`]; a client opens (and
//! reopens) links through a [`Dialer`].
//!
//! Implementations:
//!
//! - [`MemoryTransport`] / [`MemoryConnector`]: tokio channels, for
//!   hot-seat play and tests
//! - [`WebSocketTransport`] / [`WebSocketDialer`] behind the default
//!   `websocket` feature

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryConnector, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketDialer, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

static LINK_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> ConnectionId {
    ConnectionId(LINK_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Process-unique number of a link, for logs. Peers are identified by
/// the protocol's peer id, never by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Source of incoming links on the host.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Resolves with the next peer that connects.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Stops taking new links. Open links are unaffected.
    fn shutdown(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Opens links to the host. Clients redial through it when the link drops.
pub trait Dialer: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    fn dial(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// One ordered, reliable link to a remote peer.
///
/// `send` and `recv` may run concurrently on different tasks.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// The next message, or `Ok(None)` once the remote side closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn id(&self) -> ConnectionId;
}
