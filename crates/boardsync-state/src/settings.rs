//! Game settings carried inside every state.

use serde::{Deserialize, Serialize};

use crate::StateError;

/// Static, validated game configuration.
///
/// Unknown keys are ignored on decode and missing keys take their
/// defaults, so older saves keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameSettings {
    /// Maximum number of players in the game (1..=64).
    pub player_limit: usize,
    /// Maximum number of players one peer may control.
    pub max_players_per_peer: usize,
    /// Faces on the die (2..=100).
    pub dice_sides: u32,
    pub allow_name_change: bool,
    pub allow_color_change: bool,
    pub allow_peer_color_change: bool,
    /// Per-turn timer shown by the UI. `0` disables it.
    pub turn_timer_seconds: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            player_limit: 8,
            max_players_per_peer: 4,
            dice_sides: 6,
            allow_name_change: true,
            allow_color_change: true,
            allow_peer_color_change: true,
            turn_timer_seconds: 0,
        }
    }
}

impl GameSettings {
    pub fn validate(&self) -> Result<(), StateError> {
        if !(1..=64).contains(&self.player_limit) {
            return Err(StateError::InvalidSettings(format!(
                "playerLimit must be 1-64, got {}",
                self.player_limit
            )));
        }
        if self.max_players_per_peer == 0 || self.max_players_per_peer > self.player_limit {
            return Err(StateError::InvalidSettings(format!(
                "maxPlayersPerPeer must be 1-{}, got {}",
                self.player_limit, self.max_players_per_peer
            )));
        }
        if !(2..=100).contains(&self.dice_sides) {
            return Err(StateError::InvalidSettings(format!(
                "diceSides must be 2-100, got {}",
                self.dice_sides
            )));
        }
        Ok(())
    }
}
