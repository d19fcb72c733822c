//! Unified error type for boardsync.

use boardsync_engine::EngineError;
use boardsync_protocol::ProtocolError;
use boardsync_session::SessionError;
use boardsync_state::StateError;
use boardsync_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` conversions let `?` lift sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum BoardsyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A host or client operation that the current state does not allow.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The host or client task is gone.
    #[error("{0} is no longer running")]
    Unavailable(&'static str),
}
