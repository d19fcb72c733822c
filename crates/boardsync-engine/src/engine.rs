//! The engine seam used by host and client, and the registry that builds
//! engines from a state's `stateType`.

use std::collections::HashMap;
use std::fmt;

use boardsync_protocol::PeerId;
use boardsync_state::{GameState, PlayerId, SpaceId, StateType};
use serde::{Deserialize, Serialize};

use crate::{EngineError, TurnBasedGameEngine};

/// Identifies one pending prompt. Handed out with
/// [`EngineOutput::Prompt`] and given back to resume the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptToken(pub u64);

impl fmt::Display for PromptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prompt-{}", self.0)
    }
}

/// Something the engine wants its owner to do or show.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    /// A next state. The host commits it; a client sends it as
    /// `PROPOSE_GAME_STATE`.
    Propose(GameState),
    /// The acting player should roll.
    AwaitingRoll { player_id: PlayerId },
    /// A roll was taken.
    Rolled { player_id: PlayerId, roll: u32, moves: u32 },
    /// The acting player must pick where to go next.
    ChooseDestination {
        player_id: PlayerId,
        options: Vec<SpaceId>,
    },
    /// The acting player must acknowledge a message; pass `token` to
    /// [`EngineInput::Acknowledge`] afterwards.
    Prompt {
        token: PromptToken,
        player_id: PlayerId,
        message: String,
    },
    /// Every player completed the game.
    GameEnded,
}

/// External inputs that resume a suspended turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineInput {
    /// Roll with the replicated dice generator.
    Roll,
    /// Use a roll produced elsewhere (physical dice, UI animation).
    RollValue(u32),
    ChooseDestination(SpaceId),
    Acknowledge(PromptToken),
}

/// A rules engine driven by authoritative states.
///
/// Engines never mutate the state they are given. Every step produces an
/// [`EngineOutput::Propose`] and the engine only moves on once the
/// resulting authoritative state comes back through [`update`].
///
/// [`update`]: GameEngine::update
pub trait GameEngine: Send {
    fn state_type(&self) -> StateType;

    /// Feeds the latest authoritative state and runs whatever phase
    /// handlers this peer is responsible for.
    fn update(&mut self, state: GameState) -> Result<Vec<EngineOutput>, EngineError>;

    /// Resumes a suspended turn.
    fn input(&mut self, input: EngineInput) -> Result<Vec<EngineOutput>, EngineError>;

    /// The peer allowed to advance the turn in `state`, if any.
    fn acting_peer(&self, state: &GameState) -> Option<PeerId>;

    /// The last state passed to [`update`](GameEngine::update).
    fn state(&self) -> Option<&GameState>;
}

/// Who an engine is built for.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub peer_id: PeerId,
    pub is_host: bool,
}

type EngineFactory = Box<dyn Fn(&EngineContext) -> Box<dyn GameEngine> + Send + Sync>;

/// Maps state types to engine factories.
///
/// Passed explicitly to host and client constructors; there is no global
/// registry.
pub struct EngineRegistry {
    factories: HashMap<StateType, EngineFactory>,
}

impl EngineRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the turn-based engine installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(StateType::TurnBased, |ctx| {
            Box::new(TurnBasedGameEngine::new(ctx.peer_id.clone(), ctx.is_host))
        });
        registry
    }

    /// Installs (or replaces) the factory for a state type.
    pub fn register<F>(&mut self, state_type: StateType, factory: F)
    where
        F: Fn(&EngineContext) -> Box<dyn GameEngine> + Send + Sync + 'static,
    {
        self.factories.insert(state_type, Box::new(factory));
    }

    pub fn contains(&self, state_type: StateType) -> bool {
        self.factories.contains_key(&state_type)
    }

    pub fn create(&self, state_type: StateType, ctx: &EngineContext) -> Result<Box<dyn GameEngine>, EngineError> {
        let factory = self
            .factories
            .get(&state_type)
            .ok_or(EngineError::UnknownStateType(state_type))?;
        tracing::debug!(state_type = state_type.as_str(), peer_id = %ctx.peer_id, "engine created");
        Ok(factory(ctx))
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
