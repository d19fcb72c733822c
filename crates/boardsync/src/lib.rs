//! # Boardsync
//!
//! Host-authoritative state synchronization for peer-to-peer board games.
//!
//! One peer hosts. It owns the authoritative [`GameState`], validates
//! every proposal and broadcasts the result, as a compact delta when
//! that is cheaper than the full state. Clients mirror the state, run the
//! same rules engine, and propose the next step when it is their turn.
//!
//! - [`HostCore`] / [`ClientCore`]: the synchronous protocol logic
//! - [`HostServer`] / [`spawn_client`]: Tokio runners that drive them over
//!   any [`Transport`] / [`Dialer`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use boardsync::prelude::*;
//!
//! # async fn run() -> Result<(), BoardsyncError> {
//! let (transport, connector) = MemoryTransport::new();
//! let server = HostServer::builder()
//!     .board(Board::linear("Track", 20))
//!     .build_with(transport)?;
//! let (host, _host_events) = server.start();
//!
//! let client = ClientCore::new(
//!     ClientConfig::default(),
//!     EngineRegistry::with_defaults(),
//!     vec![PlayerDraft::new("Ann")],
//! )?;
//! let (ann, _events) = spawn_client(connector, client);
//!
//! host.start_game().await?;
//! ann.roll().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod handler;
mod host;
mod peer;
mod server;

pub use client::{ClientConfig, ClientCore, ClientEvent};
pub use error::BoardsyncError;
pub use host::{HostConfig, HostCore, Outbound};
pub use peer::{ClientHandle, spawn_client};
pub use server::{HostHandle, HostServer, HostServerBuilder};

/// Re-exports for typical use.
pub mod prelude {
    pub use boardsync_engine::{EngineInput, EngineOutput, EngineRegistry, GameEngine, PromptToken};
    pub use boardsync_protocol::{Message, PeerId, Recipient};
    pub use boardsync_session::{ConnectionStatus, HeartbeatConfig, SessionConfig, StatusEvent};
    pub use boardsync_state::{
        Action, Board, GameEvent, GamePhase, GameRng, GameSettings, GameState, Player, PlayerDraft,
        PlayerId, PlayerState, SaveFile, Space, SpaceId, Trigger, TurnPhase,
    };
    pub use boardsync_transport::{Connection, Dialer, MemoryConnector, MemoryTransport, Transport};

    pub use crate::{
        BoardsyncError, ClientConfig, ClientCore, ClientEvent, ClientHandle, HostConfig, HostCore,
        HostHandle, HostServer, spawn_client,
    };
}

/// Wall-clock epoch milliseconds, used for `_timestamp` and heartbeats.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
