//! Connection liveness for boardsync.
//!
//! Two sides of the same problem:
//!
//! 1. **Host side**: [`PeerSessions`] tracks every connected peer and
//!    notices when one goes silent.
//! 2. **Client side**: [`ConnectionStatusManager`] notices when the host
//!    goes silent and walks through a fixed reconnection schedule.
//!
//! Both are plain state machines. They never sleep or spawn; callers pass
//! the current [`Instant`](tokio::time::Instant) in and act on what comes
//! back, which keeps them deterministic under paused test time.

mod error;
mod peers;
mod status;

pub use error::SessionError;
pub use peers::{PeerSession, PeerSessions, SessionConfig, SessionState};
pub use status::{ConnectionStatus, ConnectionStatusManager, HeartbeatConfig, StatusEvent};
