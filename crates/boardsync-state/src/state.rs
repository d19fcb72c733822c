//! The replicated game state.

use boardsync_protocol::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Board, GamePhase, GameRng, GameSettings, Player, PlayerId, PlayerState, SpaceId, StateError,
    TurnPhase,
};

/// Discriminant that selects the engine driving a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StateType {
    #[default]
    #[serde(rename = "turn-based")]
    TurnBased,
}

impl StateType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnBased => "turn-based",
        }
    }
}

/// An event the engine found ready to fire this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggeredEvent {
    pub space_id: SpaceId,
    /// Index into the space's `events`.
    pub event_index: usize,
    pub priority: i32,
}

/// Everything peers agree on.
///
/// The host owns the authoritative copy. Clients hold mirrors that are
/// replaced wholesale on every full state or delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default)]
    pub state_type: StateType,
    pub board: Board,
    /// Insertion order. Turn order is derived from `turns_taken`.
    pub players: Vec<Player>,
    #[serde(default)]
    pub settings: GameSettings,
    pub random_generator: GameRng,
    #[serde(default)]
    pub game_phase: GamePhase,
    #[serde(default)]
    pub turn_phase: TurnPhase,
    #[serde(default)]
    pub remaining_moves: u32,
    #[serde(default)]
    pub moves_taken_this_turn: u32,
    /// Recomputed by the engine every processing cycle; never sent.
    #[serde(skip)]
    pub triggered_events: Vec<TriggeredEvent>,
    #[serde(rename = "_version", default)]
    pub version: u64,
    #[serde(rename = "_timestamp", default)]
    pub timestamp: u64,
}

impl GameState {
    /// Creates a lobby state after validating board and settings.
    pub fn new(board: Board, settings: GameSettings, rng: GameRng) -> Result<Self, StateError> {
        board.validate()?;
        settings.validate()?;
        Ok(Self {
            state_type: StateType::TurnBased,
            board,
            players: Vec::new(),
            settings,
            random_generator: rng,
            game_phase: GamePhase::InLobby,
            turn_phase: TurnPhase::ChangeTurn,
            remaining_moves: 0,
            moves_taken_this_turn: 0,
            triggered_events: Vec::new(),
            version: 0,
            timestamp: 0,
        })
    }

    /// Decodes a state from its wire form.
    pub fn from_json(value: Value) -> Result<Self, StateError> {
        let state: Self = serde_json::from_value(value)?;
        state.board.validate()?;
        state.settings.validate()?;
        Ok(state)
    }

    pub fn to_json(&self) -> Result<Value, StateError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Index of the player whose turn it is: fewest `turns_taken`, ties
    /// broken by array order.
    pub fn current_player_index(&self) -> Option<usize> {
        self.players
            .iter()
            .enumerate()
            .min_by_key(|(i, p)| (p.turns_taken, *i))
            .map(|(i, _)| i)
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.current_player_index().map(|i| &self.players[i])
    }

    pub fn current_player_mut(&mut self) -> Option<&mut Player> {
        self.current_player_index().map(|i| &mut self.players[i])
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.player_id == id)
    }

    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.player_id == id)
    }

    pub fn players_of_peer<'a>(&'a self, peer_id: &'a PeerId) -> impl Iterator<Item = &'a Player> + 'a {
        self.players.iter().filter(move |p| &p.peer_id == peer_id)
    }

    /// Removes a player, returning it.
    pub fn remove_player(&mut self, id: &PlayerId) -> Result<Player, StateError> {
        let index = self
            .players
            .iter()
            .position(|p| &p.player_id == id)
            .ok_or_else(|| StateError::UnknownPlayer(id.clone()))?;
        Ok(self.players.remove(index))
    }

    /// `true` once every player has completed the game.
    pub fn all_players_completed(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .iter()
                .all(|p| p.state == PlayerState::CompletedGame)
    }

    /// One-based round counter shown to users.
    pub fn turn_number(&self) -> u32 {
        self.players.iter().map(|p| p.turns_taken).min().unwrap_or(0) + 1
    }

    /// Puts every player on the start space.
    pub fn place_players_at_start(&mut self) {
        let start = self.board.start_space_id;
        for player in &mut self.players {
            player.current_space_id = Some(start);
        }
    }

    /// Advances the version and stamps the state. Called by the host for
    /// every mutation it broadcasts.
    pub fn bump_version(&mut self, now_ms: u64) {
        self.version += 1;
        self.timestamp = now_ms;
    }

    /// Compares everything except version, timestamp and transient
    /// fields. Used to tell real changes apart from stamped copies.
    pub fn same_content(&self, other: &Self) -> bool {
        self.state_type == other.state_type
            && self.board == other.board
            && self.players == other.players
            && self.settings == other.settings
            && self.random_generator == other.random_generator
            && self.game_phase == other.game_phase
            && self.turn_phase == other.turn_phase
            && self.remaining_moves == other.remaining_moves
            && self.moves_taken_this_turn == other.moves_taken_this_turn
    }
}
