/// What went wrong on a data channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The channel is gone. The text says which side let go.
    #[error("channel closed ({0})")]
    Closed(&'static str),

    /// Binding, accepting or dialing failed at the socket level.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake or frame failure on a WebSocket.
    #[cfg(feature = "websocket")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No further connections will arrive.
    #[error("transport shut down")]
    Shutdown,
}
