//! WebSocket data channels over `tokio-tungstenite`.
//!
//! The host listens with [`WebSocketTransport`]; clients reach it through
//! a [`WebSocketDialer`]. Game messages travel as text frames.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Dialer, Transport, TransportError, next_connection_id};

/// Host-side listener.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr, "listening for peers");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection<TcpStream>;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, remote) = self.listener.accept().await?;
        let socket = tokio_tungstenite::accept_async(stream).await?;
        let conn = WebSocketConnection::new(socket);
        tracing::debug!(conn_id = %conn.id, %remote, "peer socket accepted");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// One WebSocket link, split so a pending `recv` never holds up `send`.
pub struct WebSocketConnection<S = TcpStream> {
    id: ConnectionId,
    writer: Mutex<SplitSink<WebSocketStream<S>, Frame>>,
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(socket: WebSocketStream<S>) -> Self {
        let (writer, reader) = socket.split();
        Self {
            id: next_connection_id(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        }
    }
}

/// Client-side dialer for a fixed host URL such as `ws://10.0.0.2:9000`.
#[derive(Debug, Clone)]
pub struct WebSocketDialer {
    url: String,
}

impl WebSocketDialer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Dialer for WebSocketDialer {
    type Connection = WebSocketConnection<MaybeTlsStream<TcpStream>>;
    type Error = TransportError;

    async fn dial(&self) -> Result<Self::Connection, Self::Error> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let conn = WebSocketConnection::new(socket);
        tracing::debug!(conn_id = %conn.id, url = %self.url, "host dialed");
        Ok(conn)
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let frame = match std::str::from_utf8(data) {
            Ok(text) => Frame::text(text),
            Err(_) => Frame::binary(data.to_vec()),
        };
        self.writer.lock().await.send(frame).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut reader = self.reader.lock().await;
        while let Some(frame) = reader.next().await {
            match frame? {
                Frame::Text(text) => return Ok(Some(text.as_bytes().to_vec())),
                Frame::Binary(data) => return Ok(Some(data.to_vec())),
                Frame::Close(_) => return Ok(None),
                // ping, pong
                _ => {}
            }
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.writer.lock().await.close().await?;
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
