//! Players, their lifecycle state, and the effects attached to them.

use std::fmt;

use boardsync_protocol::PeerId;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{SpaceId, StateError};

const NICKNAME_MAX_CHARS: usize = 32;
const PLAYER_ID_MAX_CHARS: usize = 64;

/// Durable identity of a player. Survives reconnects, unlike [`PeerId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Generates a fresh random id of the form `p-<12 hex digits>`.
    pub fn generate() -> Self {
        let bytes: [u8; 6] = rand::rng().random();
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("p-{hex}"))
    }

    /// Parses and validates a client-supplied id.
    pub fn parse(raw: &str) -> Result<Self, StateError> {
        validate_player_id(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    #[default]
    Active,
    CompletedGame,
    SkippingTurn,
    Spectating,
    Disconnected,
}

impl PlayerState {
    /// Players in these states are bypassed when their turn comes up.
    pub fn is_skip_eligible(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// A timed modifier attached to a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum PlayerEffect {
    /// The player's next `remaining` turns are skipped.
    SkipTurns { remaining: u32 },
    /// `bonus` is added to the player's next `remaining_rolls` rolls.
    RollModifier { bonus: i32, remaining_rolls: u32 },
}

/// One participant in the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub player_id: PlayerId,
    pub peer_id: PeerId,
    pub nickname: String,
    pub player_color: String,
    pub peer_color: String,
    #[serde(default)]
    pub current_space_id: Option<SpaceId>,
    #[serde(default)]
    pub turns_taken: u32,
    #[serde(default)]
    pub effects: Vec<PlayerEffect>,
    #[serde(default)]
    pub state: PlayerState,
}

impl Player {
    pub fn new(
        player_id: PlayerId,
        peer_id: PeerId,
        nickname: impl Into<String>,
        player_color: impl Into<String>,
        peer_color: impl Into<String>,
    ) -> Self {
        Self {
            player_id,
            peer_id,
            nickname: nickname.into(),
            player_color: player_color.into(),
            peer_color: peer_color.into(),
            current_space_id: None,
            turns_taken: 0,
            effects: Vec::new(),
            state: PlayerState::Active,
        }
    }

    pub fn is_skip_eligible(&self) -> bool {
        self.state.is_skip_eligible()
    }

    /// Returns `true` if a [`PlayerEffect::SkipTurns`] is still pending.
    pub fn has_pending_skip(&self) -> bool {
        self.effects
            .iter()
            .any(|e| matches!(e, PlayerEffect::SkipTurns { remaining } if *remaining > 0))
    }

    /// Consumes one pending skip. When the last one is used up the effect
    /// is dropped and a skipping player becomes active again.
    pub fn consume_skip(&mut self) {
        for effect in &mut self.effects {
            if let PlayerEffect::SkipTurns { remaining } = effect {
                *remaining = remaining.saturating_sub(1);
                break;
            }
        }
        self.effects
            .retain(|e| !matches!(e, PlayerEffect::SkipTurns { remaining: 0 }));
        if !self.has_pending_skip() && self.state == PlayerState::SkippingTurn {
            self.state = PlayerState::Active;
        }
    }

    /// Sums the active roll modifiers and consumes one roll from each.
    pub fn take_roll_bonus(&mut self) -> i32 {
        let mut bonus = 0;
        for effect in &mut self.effects {
            if let PlayerEffect::RollModifier {
                bonus: b,
                remaining_rolls,
            } = effect
            {
                if *remaining_rolls > 0 {
                    bonus += *b;
                    *remaining_rolls -= 1;
                }
            }
        }
        self.effects.retain(|e| {
            !matches!(
                e,
                PlayerEffect::RollModifier {
                    remaining_rolls: 0,
                    ..
                }
            )
        });
        bonus
    }
}

/// A player as submitted by a client in `JOIN` or `PROPOSE_ADD_PLAYER`.
///
/// The host fills in everything the client does not get to choose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_color: Option<String>,
}

impl PlayerDraft {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            player_id: None,
            nickname: nickname.into(),
            player_color: None,
            peer_color: None,
        }
    }

    /// Decodes and validates a draft from its wire form.
    pub fn from_value(value: serde_json::Value) -> Result<Self, StateError> {
        let draft: Self = serde_json::from_value(value)?;
        draft.validate()?;
        Ok(draft)
    }

    pub fn validate(&self) -> Result<(), StateError> {
        validate_nickname(&self.nickname)?;
        if let Some(id) = &self.player_id {
            validate_player_id(id)?;
        }
        for color in [&self.player_color, &self.peer_color].into_iter().flatten() {
            validate_color(color)?;
        }
        Ok(())
    }

    /// Turns the draft into a fresh player owned by `peer_id`.
    ///
    /// Missing colors fall back to `default_color`.
    pub fn into_player(self, peer_id: PeerId, default_color: &str) -> Result<Player, StateError> {
        self.validate()?;
        let player_id = match self.player_id {
            Some(id) => PlayerId(id),
            None => PlayerId::generate(),
        };
        Ok(Player::new(
            player_id,
            peer_id,
            self.nickname.trim(),
            self.player_color.unwrap_or_else(|| default_color.to_string()),
            self.peer_color.unwrap_or_else(|| default_color.to_string()),
        ))
    }
}

/// Checks a nickname and returns its trimmed form.
pub fn validate_nickname(raw: &str) -> Result<&str, StateError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > NICKNAME_MAX_CHARS {
        return Err(StateError::InvalidPlayer(format!(
            "nickname must be 1-{NICKNAME_MAX_CHARS} characters, got {len}"
        )));
    }
    Ok(trimmed)
}

/// Checks a `#RRGGBB` color.
pub fn validate_color(raw: &str) -> Result<(), StateError> {
    let valid = raw.len() == 7
        && raw.starts_with('#')
        && raw[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidPlayer(format!("color {raw:?} is not #RRGGBB")))
    }
}

/// Checks a client-supplied player id.
pub fn validate_player_id(raw: &str) -> Result<(), StateError> {
    let valid = !raw.is_empty()
        && raw.len() <= PLAYER_ID_MAX_CHARS
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidPlayer(format!("player id {raw:?} is malformed")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn player() -> Player {
        Player::new("p-1".into(), "peer-1".into(), "Ann", "#ff0000", "#00ff00")
    }

    #[test]
    fn test_generate_produces_valid_unique_ids() {
        let a = PlayerId::generate();
        let b = PlayerId::generate();
        assert_ne!(a, b);
        assert!(validate_player_id(a.as_str()).is_ok());
        assert_eq!(a.as_str().len(), 14);
    }

    #[test]
    fn test_player_serializes_camel_case() {
        let value = serde_json::to_value(player()).unwrap();
        assert_eq!(value["playerId"], "p-1");
        assert_eq!(value["peerId"], "peer-1");
        assert_eq!(value["turnsTaken"], 0);
        assert_eq!(value["state"], "ACTIVE");
        assert!(value["currentSpaceId"].is_null());
    }

    #[test]
    fn test_effects_are_tagged() {
        let effect = PlayerEffect::RollModifier {
            bonus: 2,
            remaining_rolls: 1,
        };
        assert_eq!(
            serde_json::to_value(&effect).unwrap(),
            json!({"type": "ROLL_MODIFIER", "bonus": 2, "remainingRolls": 1})
        );
    }

    #[test]
    fn test_skip_eligibility() {
        assert!(!PlayerState::Active.is_skip_eligible());
        for state in [
            PlayerState::CompletedGame,
            PlayerState::SkippingTurn,
            PlayerState::Spectating,
            PlayerState::Disconnected,
        ] {
            assert!(state.is_skip_eligible());
        }
    }

    #[test]
    fn test_consume_skip_restores_active_at_zero() {
        let mut p = player();
        p.effects.push(PlayerEffect::SkipTurns { remaining: 2 });
        p.state = PlayerState::SkippingTurn;

        p.consume_skip();
        assert!(p.has_pending_skip());
        assert_eq!(p.state, PlayerState::SkippingTurn);

        p.consume_skip();
        assert!(!p.has_pending_skip());
        assert!(p.effects.is_empty());
        assert_eq!(p.state, PlayerState::Active);
    }

    #[test]
    fn test_take_roll_bonus_consumes_rolls() {
        let mut p = player();
        p.effects.push(PlayerEffect::RollModifier {
            bonus: 2,
            remaining_rolls: 2,
        });
        p.effects.push(PlayerEffect::RollModifier {
            bonus: -1,
            remaining_rolls: 1,
        });

        assert_eq!(p.take_roll_bonus(), 1);
        assert_eq!(p.take_roll_bonus(), 2);
        assert_eq!(p.take_roll_bonus(), 0);
        assert!(p.effects.is_empty());
    }

    #[test]
    fn test_validate_nickname_trims_and_bounds() {
        assert_eq!(validate_nickname("  Rex ").unwrap(), "Rex");
        assert!(validate_nickname("   ").is_err());
        assert!(validate_nickname(&"x".repeat(32)).is_ok());
        assert!(validate_nickname(&"x".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_color() {
        assert!(validate_color("#A0b1C2").is_ok());
        assert!(validate_color("A0b1C2").is_err());
        assert!(validate_color("#A0b1C").is_err());
        assert!(validate_color("#GGGGGG").is_err());
    }

    #[test]
    fn test_validate_player_id() {
        assert!(validate_player_id("p_1-A").is_ok());
        assert!(validate_player_id("").is_err());
        assert!(validate_player_id("has space").is_err());
        assert!(validate_player_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_draft_into_player_fills_defaults() {
        let draft = PlayerDraft::from_value(json!({"nickname": " Bo "})).unwrap();
        let p = draft.into_player("peer-9".into(), "#123456").unwrap();
        assert_eq!(p.nickname, "Bo");
        assert_eq!(p.player_color, "#123456");
        assert_eq!(p.peer_id, PeerId::from("peer-9"));
        assert!(p.player_id.as_str().starts_with("p-"));
    }

    #[test]
    fn test_draft_rejects_bad_color() {
        let err = PlayerDraft::from_value(json!({"nickname": "Bo", "playerColor": "red"}));
        assert!(matches!(err, Err(StateError::InvalidPlayer(_))));
    }
}
