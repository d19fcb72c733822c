//! Turn progression for boardsync.
//!
//! # Key types
//!
//! - [`PhaseStateMachine`]: game/turn phase pointers with entry handlers
//! - [`events`]: trigger evaluation and action execution
//! - [`TurnBasedGameEngine`]: the built-in rules engine
//! - [`GameEngine`] / [`EngineRegistry`]: the seam host and client use

mod engine;
mod error;
pub mod events;
mod machine;
mod turn;

pub use engine::{EngineContext, EngineInput, EngineOutput, EngineRegistry, GameEngine, PromptToken};
pub use error::EngineError;
pub use events::ActionOutcome;
pub use machine::{PhaseHandler, PhaseStateMachine};
pub use turn::{TurnBasedGameEngine, TurnContext, acting_peer};
