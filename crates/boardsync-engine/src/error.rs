//! Error types for the engine layer.

use boardsync_protocol::PeerId;
use boardsync_state::{GamePhase, SpaceId, StateError, StateType, TurnPhase};

use crate::PromptToken;

/// Errors raised by phase handlers and external engine inputs.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The state has no players, so nobody can take a turn.
    #[error("no current player")]
    MissingCurrentPlayer,

    /// An input arrived in the wrong turn phase.
    #[error("expected turn phase {expected}, state is in {actual}")]
    WrongPhase { expected: TurnPhase, actual: TurnPhase },

    /// Turn inputs are only accepted while the game is running.
    #[error("game is {0}, not in game")]
    NotInGame(GamePhase),

    /// This peer does not act for the current turn.
    #[error("peer {0} is not acting for the current turn")]
    NotActing(PeerId),

    /// The engine has not received a state yet.
    #[error("engine has no state")]
    NoState,

    /// The token does not match the pending prompt.
    #[error("unknown prompt token {0}")]
    UnknownToken(PromptToken),

    /// The chosen space is not reachable from the current one.
    #[error("{0} is not a valid destination")]
    InvalidDestination(SpaceId),

    /// A triggered event no longer exists on the board.
    #[error("no event {index} on {space_id}")]
    UnknownEvent { space_id: SpaceId, index: usize },

    /// No engine is registered for the state type.
    #[error("no engine registered for state type {0:?}")]
    UnknownStateType(StateType),

    /// A handler registered by a collaborator failed.
    #[error("phase handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    State(#[from] StateError),
}
