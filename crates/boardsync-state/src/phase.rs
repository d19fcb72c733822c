//! Phase discriminants carried by every game state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Session-level phase.
///
/// ```text
/// IN_LOBBY ⇄ IN_GAME ⇄ PAUSED
///              │
///              └─→ GAME_ENDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    #[default]
    InLobby,
    InGame,
    Paused,
    GameEnded,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InLobby => "IN_LOBBY",
            Self::InGame => "IN_GAME",
            Self::Paused => "PAUSED",
            Self::GameEnded => "GAME_ENDED",
        })
    }
}

/// Per-turn phase of the turn-based engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnPhase {
    #[default]
    ChangeTurn,
    BeginTurn,
    WaitingForMove,
    ProcessingEvents,
    ProcessingEvent,
    ProcessingMove,
    PlayerChoosingDestination,
    EndTurn,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ChangeTurn => "CHANGE_TURN",
            Self::BeginTurn => "BEGIN_TURN",
            Self::WaitingForMove => "WAITING_FOR_MOVE",
            Self::ProcessingEvents => "PROCESSING_EVENTS",
            Self::ProcessingEvent => "PROCESSING_EVENT",
            Self::ProcessingMove => "PROCESSING_MOVE",
            Self::PlayerChoosingDestination => "PLAYER_CHOOSING_DESTINATION",
            Self::EndTurn => "END_TURN",
        })
    }
}
