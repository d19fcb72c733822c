//! Host-side session registry: who is connected and who went quiet.
//!
//! ```text
//!   create() ──→ [Connected] ──(silence > timeout / close)──→ [Disconnected] ──(after grace)──→ cleanup()
//! ```
//!
//! A peer id belongs to one connection. A client that comes back gets a
//! fresh peer id and reclaims its players by player id, so a
//! disconnected session is only kept around long enough for late
//! messages to be attributed.

use std::collections::HashMap;
use std::time::Duration;

use boardsync_protocol::PeerId;
use tokio::time::Instant;

use crate::SessionError;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Silence after which a peer counts as disconnected.
    pub heartbeat_timeout: Duration,
    /// How long a disconnected session is kept before `cleanup` drops it.
    pub disconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(20),
            disconnect_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected { since: Instant },
}

#[derive(Debug, Clone)]
pub struct PeerSession {
    pub peer_id: PeerId,
    pub state: SessionState,
    pub connected_at: Instant,
    /// Last time anything arrived from the peer.
    pub last_seen: Instant,
    /// Timestamp carried by the peer's most recent heartbeat.
    pub last_heartbeat: Option<u64>,
}

/// Tracks every peer connected to the host.
///
/// Not thread-safe on its own; the host actor owns it.
pub struct PeerSessions {
    sessions: HashMap<PeerId, PeerSession>,
    config: SessionConfig,
}

impl PeerSessions {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    /// Registers a freshly opened connection.
    ///
    /// # Errors
    /// [`SessionError::AlreadyConnected`] if the peer is already live.
    pub fn create(&mut self, peer_id: PeerId, now: Instant) -> Result<&PeerSession, SessionError> {
        if let Some(existing) = self.sessions.get(&peer_id) {
            if existing.state == SessionState::Connected {
                return Err(SessionError::AlreadyConnected(peer_id));
            }
        }

        tracing::info!(%peer_id, "peer session created");
        let session = PeerSession {
            peer_id: peer_id.clone(),
            state: SessionState::Connected,
            connected_at: now,
            last_seen: now,
            last_heartbeat: None,
        };
        Ok(self.sessions.entry(peer_id).insert_entry(session).into_mut())
    }

    /// Records traffic from a peer.
    pub fn touch(&mut self, peer_id: &PeerId, now: Instant) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| SessionError::NotFound(peer_id.clone()))?;
        session.last_seen = now;
        Ok(())
    }

    /// Records a heartbeat and its timestamp.
    pub fn record_heartbeat(&mut self, peer_id: &PeerId, timestamp: u64, now: Instant) -> Result<(), SessionError> {
        self.touch(peer_id, now)?;
        if let Some(session) = self.sessions.get_mut(peer_id) {
            session.last_heartbeat = Some(session.last_heartbeat.map_or(timestamp, |t| t.max(timestamp)));
        }
        Ok(())
    }

    /// Marks a peer disconnected (its connection closed).
    ///
    /// Returns `true` if this changed anything; repeated calls are no-ops.
    pub fn disconnect(&mut self, peer_id: &PeerId, now: Instant) -> Result<bool, SessionError> {
        let session = self
            .sessions
            .get_mut(peer_id)
            .ok_or_else(|| SessionError::NotFound(peer_id.clone()))?;
        if session.state != SessionState::Connected {
            return Ok(false);
        }
        session.state = SessionState::Disconnected { since: now };
        tracing::info!(%peer_id, "peer disconnected");
        Ok(true)
    }

    /// Disconnects every connected peer silent for longer than the
    /// heartbeat timeout and returns them.
    pub fn expire_silent(&mut self, now: Instant) -> Vec<PeerId> {
        let timeout = self.config.heartbeat_timeout;
        let mut expired = Vec::new();
        for session in self.sessions.values_mut() {
            if session.state == SessionState::Connected && now.saturating_duration_since(session.last_seen) > timeout {
                session.state = SessionState::Disconnected { since: now };
                tracing::info!(peer_id = %session.peer_id, "peer timed out");
                expired.push(session.peer_id.clone());
            }
        }
        expired.sort();
        expired
    }

    /// Drops sessions that have been disconnected longer than the grace
    /// period and returns their ids.
    pub fn cleanup(&mut self, now: Instant) -> Vec<PeerId> {
        let grace = self.config.disconnect_grace;
        let mut removed = Vec::new();
        self.sessions.retain(|peer_id, session| match session.state {
            SessionState::Disconnected { since } if now.saturating_duration_since(since) > grace => {
                removed.push(peer_id.clone());
                false
            }
            _ => true,
        });
        removed
    }

    /// Forgets a peer immediately (kicked, or left for good).
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerSession> {
        self.sessions.remove(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerSession> {
        self.sessions.get(peer_id)
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.get(peer_id)
            .is_some_and(|s| s.state == SessionState::Connected)
    }

    /// Connected peers, sorted for stable iteration.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Connected)
            .map(|s| s.peer_id.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
