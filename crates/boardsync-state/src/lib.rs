//! Replicated game state for boardsync.
//!
//! Everything peers agree on lives in one [`GameState`] value: the board,
//! the players, settings, the shared dice generator and the phase
//! pointers. The host owns the authoritative copy and ships it to clients
//! either whole or as a [`StateDelta`].

mod board;
pub mod delta;
mod error;
mod phase;
mod player;
mod rng;
mod save;
mod settings;
mod state;

pub use board::{Action, Board, EventState, GameEvent, Space, SpaceId, Trigger, TriggerContext};
pub use delta::{DeltaOp, StateDelta, should_use_delta};
pub use error::StateError;
pub use phase::{GamePhase, TurnPhase};
pub use player::{
    Player, PlayerDraft, PlayerEffect, PlayerId, PlayerState, validate_color, validate_nickname,
    validate_player_id,
};
pub use rng::GameRng;
pub use save::{SaveFile, SaveMetadata};
pub use settings::GameSettings;
pub use state::{GameState, StateType, TriggeredEvent};
