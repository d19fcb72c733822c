//! Two independent phase pointers plus the handlers that fire on entry.
//!
//! The machine knows nothing about game rules. It stores the current game
//! phase and turn phase, and when told to transition it moves the pointer
//! and then runs every handler registered for the new phase, in
//! registration order. There are no exit hooks and no terminal state.

use std::collections::HashMap;

use boardsync_state::{GamePhase, TurnPhase};

use crate::EngineError;

/// A phase entry handler over context `C`.
pub type PhaseHandler<C> = Box<dyn FnMut(&mut C) -> Result<(), EngineError> + Send>;

pub struct PhaseStateMachine<C> {
    game_phase: GamePhase,
    turn_phase: TurnPhase,
    game_handlers: HashMap<GamePhase, Vec<PhaseHandler<C>>>,
    turn_handlers: HashMap<TurnPhase, Vec<PhaseHandler<C>>>,
}

impl<C> PhaseStateMachine<C> {
    pub fn new() -> Self {
        Self {
            game_phase: GamePhase::default(),
            turn_phase: TurnPhase::default(),
            game_handlers: HashMap::new(),
            turn_handlers: HashMap::new(),
        }
    }

    pub fn register_game_phase_handler<F>(&mut self, phase: GamePhase, handler: F)
    where
        F: FnMut(&mut C) -> Result<(), EngineError> + Send + 'static,
    {
        self.game_handlers.entry(phase).or_default().push(Box::new(handler));
    }

    pub fn register_turn_phase_handler<F>(&mut self, phase: TurnPhase, handler: F)
    where
        F: FnMut(&mut C) -> Result<(), EngineError> + Send + 'static,
    {
        self.turn_handlers.entry(phase).or_default().push(Box::new(handler));
    }

    /// Sets both pointers without running any handler.
    pub fn init(&mut self, game_phase: GamePhase, turn_phase: TurnPhase) {
        self.game_phase = game_phase;
        self.turn_phase = turn_phase;
    }

    /// Moves to `phase` and runs its handlers.
    ///
    /// The first failing handler stops the chain; the pointer has already
    /// moved by then.
    pub fn transition_game_phase(&mut self, phase: GamePhase, ctx: &mut C) -> Result<(), EngineError> {
        tracing::debug!(from = %self.game_phase, to = %phase, "game phase transition");
        self.game_phase = phase;
        run(self.game_handlers.get_mut(&phase), ctx)
    }

    /// Moves to `phase` and runs its handlers.
    pub fn transition_turn_phase(&mut self, phase: TurnPhase, ctx: &mut C) -> Result<(), EngineError> {
        tracing::debug!(from = %self.turn_phase, to = %phase, "turn phase transition");
        self.turn_phase = phase;
        run(self.turn_handlers.get_mut(&phase), ctx)
    }

    pub fn is_in_game_phase(&self, phase: GamePhase) -> bool {
        self.game_phase == phase
    }

    pub fn is_in_turn_phase(&self, phase: TurnPhase) -> bool {
        self.turn_phase == phase
    }

    pub fn game_phase(&self) -> GamePhase {
        self.game_phase
    }

    pub fn turn_phase(&self) -> TurnPhase {
        self.turn_phase
    }
}

impl<C> Default for PhaseStateMachine<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn run<C>(handlers: Option<&mut Vec<PhaseHandler<C>>>, ctx: &mut C) -> Result<(), EngineError> {
    for handler in handlers.into_iter().flatten() {
        handler(ctx)?;
    }
    Ok(())
}
