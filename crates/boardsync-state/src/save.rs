//! Save files: a wire-identical snapshot plus a little metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GamePhase, GameState, StateError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    pub map_name: String,
    pub game_phase: GamePhase,
    pub turn_number: u32,
    /// Epoch ms.
    pub created_at: u64,
}

/// A persisted game.
///
/// `snapshot` is exactly what the host would put in a `GAME_STATE`
/// message, so a restored save can be broadcast without conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveFile {
    pub metadata: SaveMetadata,
    pub snapshot: Value,
}

impl SaveFile {
    pub fn capture(state: &GameState, created_at: u64) -> Result<Self, StateError> {
        Ok(Self {
            metadata: SaveMetadata {
                map_name: state.board.name.clone(),
                game_phase: state.game_phase,
                turn_number: state.turn_number(),
                created_at,
            },
            snapshot: state.to_json()?,
        })
    }

    pub fn restore(&self) -> Result<GameState, StateError> {
        GameState::from_json(self.snapshot.clone())
    }

    pub fn to_json_string(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, StateError> {
        Ok(serde_json::from_str(raw)?)
    }
}
