//! Error types for the session layer.

use boardsync_protocol::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session exists for the peer.
    #[error("session not found for peer {0}")]
    NotFound(PeerId),

    /// The peer already has a connected session.
    #[error("peer {0} already has an active session")]
    AlreadyConnected(PeerId),

    /// A heartbeat configuration value is unusable.
    #[error("invalid heartbeat config: {0}")]
    InvalidConfig(String),
}
