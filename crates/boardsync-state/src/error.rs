//! Error types for the state layer.

use crate::{PlayerId, SpaceId};

/// Errors raised while building, decoding, validating or patching state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The JSON did not decode into a game state (or part of one).
    #[error("invalid state JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The board graph is inconsistent.
    #[error("invalid board: {0}")]
    InvalidBoard(String),

    /// A settings value is out of range.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// Player data failed validation (nickname, color, id shape).
    #[error("invalid player: {0}")]
    InvalidPlayer(String),

    /// No player with this id exists.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// No space with this id exists on the board.
    #[error("unknown space {0}")]
    UnknownSpace(SpaceId),

    /// The serialized random generator is malformed.
    #[error("invalid random generator: {0}")]
    InvalidRng(String),

    /// A delta could not be computed or applied.
    #[error("delta: {0}")]
    Delta(String),
}
