//! In-process transport built on Tokio channels.
//!
//! Two [`MemoryConnection`]s created together form one data channel:
//! whatever one side sends, the other side receives, in order. Closing
//! either side makes the other side's `recv` return `Ok(None)`, the same
//! shape a WebSocket close has.

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, Dialer, Transport, TransportError, next_connection_id};

/// One end of an in-memory data channel.
pub struct MemoryConnection {
    id: ConnectionId,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryConnection {
    /// Creates a connected pair of endpoints.
    pub fn pair() -> (MemoryConnection, MemoryConnection) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = MemoryConnection {
            id: next_connection_id(),
            outgoing: Mutex::new(Some(b_tx)),
            incoming: Mutex::new(a_rx),
        };
        let b = MemoryConnection {
            id: next_connection_id(),
            outgoing: Mutex::new(Some(a_tx)),
            incoming: Mutex::new(b_rx),
        };
        (a, b)
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let outgoing = self.outgoing.lock().await;
        let sender = outgoing
            .as_ref()
            .ok_or_else(|| TransportError::Closed("closed locally"))?;
        sender
            .send(data.to_vec())
            .map_err(|_| TransportError::Closed("remote end dropped"))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.incoming.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        // Dropping our sender ends the remote receiver's stream.
        self.outgoing.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Listening side of the in-memory transport.
pub struct MemoryTransport {
    pending: mpsc::UnboundedReceiver<MemoryConnection>,
}

/// Dialing side of the in-memory transport. Cheap to clone.
#[derive(Clone)]
pub struct MemoryConnector {
    listener: mpsc::UnboundedSender<MemoryConnection>,
}

impl MemoryTransport {
    /// Creates a transport and the connector clients use to reach it.
    pub fn new() -> (MemoryTransport, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryTransport { pending: rx },
            MemoryConnector { listener: tx },
        )
    }
}

impl MemoryConnector {
    /// Opens a new data channel to the transport's accept loop.
    pub fn connect(&self) -> Result<MemoryConnection, TransportError> {
        let (local, remote) = MemoryConnection::pair();
        self.listener
            .send(remote)
            .map_err(|_| TransportError::Shutdown)?;
        tracing::debug!(id = %local.id(), "memory connection dialed");
        Ok(local)
    }
}

impl Dialer for MemoryConnector {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn dial(&self) -> Result<Self::Connection, Self::Error> {
        self.connect()
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.pending.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}
