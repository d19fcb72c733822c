//! Wire message types shared by host and client.
//!
//! Every message on the data channel is a JSON object tagged by `type`:
//!
//! ```text
//! { "type": "NAME_CHANGE", "playerId": "p-1", "nickname": "Rex" }
//! ```
//!
//! Game states and deltas travel as opaque JSON objects. Only the state
//! crate knows how to interpret them, the protocol layer just carries
//! them, the same way it carries any other field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Transport-level identity of a peer.
///
/// The host assigns one to every connection in its `CONNECTION_PACKAGE`.
/// It can change across reconnects; player ids are the durable key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// The id the host uses for itself.
    pub fn host() -> Self {
        Self("host".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who an outbound host message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every connected peer.
    All,
    /// One specific peer.
    Peer(PeerId),
    /// Everyone except the given peer.
    AllExcept(PeerId),
}

impl Recipient {
    /// Returns `true` if a message for this recipient reaches `peer`.
    pub fn includes(&self, peer: &PeerId) -> bool {
        match self {
            Self::All => true,
            Self::Peer(target) => target == peer,
            Self::AllExcept(excluded) => excluded != peer,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Every message that travels between host and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    /// Host → Client, once on open: the full bootstrap state and the
    /// peer id the host assigned to this connection.
    ConnectionPackage { game_state: Value, peer_id: PeerId },

    /// Client → Host: join with one or more local players.
    Join { peer_id: PeerId, players: Vec<Value> },

    /// Host → Client: join refused.
    JoinRejected { reason: String },

    /// Host → Client: full-state broadcast.
    GameState { game_state: Value },

    /// Host → Client: incremental broadcast.
    GameStateDelta { delta: Value },

    /// Client → Host: action proposal, always a full state.
    ProposeGameState { game_state: Value },

    /// Client → Host: resynchronisation request.
    RequestFullState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Client → Host: add another locally-owned player.
    ProposeAddPlayer { player: Value },

    /// Host → Client: add-player refused.
    AddPlayerRejected {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player: Option<Value>,
    },

    /// Client → Host: rename a player.
    NameChange { player_id: String, nickname: String },

    /// Client → Host: recolor a player piece.
    ColorChange { player_id: String, player_color: String },

    /// Client → Host: recolor the peer badge shared by a peer's players.
    PeerColorChange { player_id: String, peer_color: String },

    /// Client → Host: remove a player.
    RemovePlayer { player_id: String },

    /// Host → Client: the game leaves the lobby.
    StartGame,

    /// Host → Client: forcible disconnect.
    Kick {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Either direction: liveness ping carrying the sender's epoch ms.
    Heartbeat { timestamp: u64 },

    /// Either direction: echo of a heartbeat.
    HeartbeatAck { timestamp: u64 },
}

impl Message {
    /// Returns the discriminant of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ConnectionPackage { .. } => MessageType::ConnectionPackage,
            Self::Join { .. } => MessageType::Join,
            Self::JoinRejected { .. } => MessageType::JoinRejected,
            Self::GameState { .. } => MessageType::GameState,
            Self::GameStateDelta { .. } => MessageType::GameStateDelta,
            Self::ProposeGameState { .. } => MessageType::ProposeGameState,
            Self::RequestFullState { .. } => MessageType::RequestFullState,
            Self::ProposeAddPlayer { .. } => MessageType::ProposeAddPlayer,
            Self::AddPlayerRejected { .. } => MessageType::AddPlayerRejected,
            Self::NameChange { .. } => MessageType::NameChange,
            Self::ColorChange { .. } => MessageType::ColorChange,
            Self::PeerColorChange { .. } => MessageType::PeerColorChange,
            Self::RemovePlayer { .. } => MessageType::RemovePlayer,
            Self::StartGame => MessageType::StartGame,
            Self::Kick { .. } => MessageType::Kick,
            Self::Heartbeat { .. } => MessageType::Heartbeat,
            Self::HeartbeatAck { .. } => MessageType::HeartbeatAck,
        }
    }

    /// Converts the message into its JSON object form.
    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        serde_json::to_value(self).map_err(ProtocolError::Encode)
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The `type` tag of a [`Message`], used as the routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    ConnectionPackage,
    Join,
    JoinRejected,
    GameState,
    GameStateDelta,
    ProposeGameState,
    RequestFullState,
    ProposeAddPlayer,
    AddPlayerRejected,
    NameChange,
    ColorChange,
    PeerColorChange,
    RemovePlayer,
    StartGame,
    Kick,
    Heartbeat,
    HeartbeatAck,
}

impl MessageType {
    /// Every known message type, in wire-table order.
    pub const ALL: [MessageType; 17] = [
        Self::ConnectionPackage,
        Self::Join,
        Self::JoinRejected,
        Self::GameState,
        Self::GameStateDelta,
        Self::ProposeGameState,
        Self::RequestFullState,
        Self::ProposeAddPlayer,
        Self::AddPlayerRejected,
        Self::NameChange,
        Self::ColorChange,
        Self::PeerColorChange,
        Self::RemovePlayer,
        Self::StartGame,
        Self::Kick,
        Self::Heartbeat,
        Self::HeartbeatAck,
    ];

    /// The tag as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionPackage => "CONNECTION_PACKAGE",
            Self::Join => "JOIN",
            Self::JoinRejected => "JOIN_REJECTED",
            Self::GameState => "GAME_STATE",
            Self::GameStateDelta => "GAME_STATE_DELTA",
            Self::ProposeGameState => "PROPOSE_GAME_STATE",
            Self::RequestFullState => "REQUEST_FULL_STATE",
            Self::ProposeAddPlayer => "PROPOSE_ADD_PLAYER",
            Self::AddPlayerRejected => "ADD_PLAYER_REJECTED",
            Self::NameChange => "NAME_CHANGE",
            Self::ColorChange => "COLOR_CHANGE",
            Self::PeerColorChange => "PEER_COLOR_CHANGE",
            Self::RemovePlayer => "REMOVE_PLAYER",
            Self::StartGame => "START_GAME",
            Self::Kick => "KICK",
            Self::Heartbeat => "HEARTBEAT",
            Self::HeartbeatAck => "HEARTBEAT_ACK",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownType(s.to_string()))
    }
}
