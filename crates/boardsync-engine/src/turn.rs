//! The turn-based engine.
//!
//! ```text
//! CHANGE_TURN ─→ BEGIN_TURN ─→ WAITING_FOR_MOVE ──roll──→ PROCESSING_EVENTS ⇄ PROCESSING_EVENT
//!      ↑  │                                                   │        ↑
//!      │  └─(skip)─┐                                          ↓        │
//!      │           ↓                                   PROCESSING_MOVE ─┘
//!      └──────── END_TURN ←──────(no moves left)───────────┘   ⇅ choose
//!                                               PLAYER_CHOOSING_DESTINATION
//! ```
//!
//! Every handler reads the authoritative state, clones it, applies one
//! step and proposes the clone. Nothing advances locally: the next
//! handler fires when the proposal comes back as a new authoritative
//! state. Only the acting peer runs turn handlers.

use boardsync_protocol::PeerId;
use boardsync_state::{GamePhase, GameState, Player, PlayerId, PlayerState, SpaceId, StateType, TriggeredEvent, TurnPhase};

use crate::engine::{EngineInput, EngineOutput, GameEngine, PromptToken};
use crate::{EngineError, PhaseStateMachine, events};

/// The peer allowed to advance the turn: the owner of the current player,
/// or the host when that player is disconnected.
pub fn acting_peer(state: &GameState) -> Option<PeerId> {
    if state.game_phase != GamePhase::InGame {
        return None;
    }
    let player = state.current_player()?;
    if player.state == PlayerState::Disconnected {
        Some(PeerId::host())
    } else {
        Some(player.peer_id.clone())
    }
}

#[derive(Debug, Clone)]
struct PendingPrompt {
    token: PromptToken,
    event: TriggeredEvent,
    message: String,
}

/// What turn handlers get to work with.
pub struct TurnContext {
    peer_id: PeerId,
    is_host: bool,
    state: Option<GameState>,
    outputs: Vec<EngineOutput>,
    pending_prompt: Option<PendingPrompt>,
    next_token: u64,
}

impl TurnContext {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// The authoritative state being handled.
    pub fn state(&self) -> Result<&GameState, EngineError> {
        self.state.as_ref().ok_or(EngineError::NoState)
    }

    pub fn emit(&mut self, output: EngineOutput) {
        self.outputs.push(output);
    }

    fn propose(&mut self, next: GameState) {
        tracing::debug!(
            peer_id = %self.peer_id,
            turn_phase = %next.turn_phase,
            base_version = next.version,
            "proposing next step"
        );
        self.outputs.push(EngineOutput::Propose(next));
    }

    fn current_player(&self) -> Result<&Player, EngineError> {
        self.state()?
            .current_player()
            .ok_or(EngineError::MissingCurrentPlayer)
    }

    /// Working copy for the next step.
    fn next_state(&self) -> Result<GameState, EngineError> {
        let mut next = self.state()?.clone();
        next.triggered_events.clear();
        Ok(next)
    }

    /// The host is standing in for a player who is gone. It cannot roll,
    /// choose or acknowledge on their behalf, so it ends the turn.
    fn forfeit_if_disconnected(&mut self) -> Result<bool, EngineError> {
        if self.current_player()?.state != PlayerState::Disconnected {
            return Ok(false);
        }
        let mut next = self.next_state()?;
        tracing::info!(player_id = %self.current_player()?.player_id, "forfeiting turn of disconnected player");
        events::reset_events(&mut next);
        next.turn_phase = TurnPhase::EndTurn;
        self.pending_prompt = None;
        self.propose(next);
        Ok(true)
    }
}

/// Inputs a turn step is waiting for, used to tell identical states apart
/// from ones where the turn really moved.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StepKey {
    game_phase: GamePhase,
    turn_phase: TurnPhase,
    remaining_moves: u32,
    moves_taken_this_turn: u32,
    players: Vec<(PlayerId, PlayerState, u32)>,
}

impl StepKey {
    fn of(state: &GameState) -> Self {
        Self {
            game_phase: state.game_phase,
            turn_phase: state.turn_phase,
            remaining_moves: state.remaining_moves,
            moves_taken_this_turn: state.moves_taken_this_turn,
            players: state
                .players
                .iter()
                .map(|p| (p.player_id.clone(), p.state, p.turns_taken))
                .collect(),
        }
    }
}

/// Drives a turn-based game from one peer's point of view.
pub struct TurnBasedGameEngine {
    machine: PhaseStateMachine<TurnContext>,
    ctx: TurnContext,
    /// The step the handlers last ran for. The same step arriving again
    /// (say, after someone renamed a player) must not be proposed twice.
    last_step: Option<StepKey>,
    /// Base version of this peer's outstanding proposal. A newer state
    /// with the step unchanged means the proposal lost a race and was
    /// dropped by the host, so the step is run again.
    proposed_from: Option<u64>,
}

impl TurnBasedGameEngine {
    pub fn new(peer_id: PeerId, is_host: bool) -> Self {
        let mut machine = PhaseStateMachine::new();
        machine.register_turn_phase_handler(TurnPhase::ChangeTurn, change_turn);
        machine.register_turn_phase_handler(TurnPhase::BeginTurn, begin_turn);
        machine.register_turn_phase_handler(TurnPhase::WaitingForMove, waiting_for_move);
        machine.register_turn_phase_handler(TurnPhase::ProcessingEvents, processing_events);
        machine.register_turn_phase_handler(TurnPhase::ProcessingEvent, processing_event);
        machine.register_turn_phase_handler(TurnPhase::ProcessingMove, processing_move);
        machine.register_turn_phase_handler(TurnPhase::PlayerChoosingDestination, choosing_destination);
        machine.register_turn_phase_handler(TurnPhase::EndTurn, end_turn);
        machine.register_game_phase_handler(GamePhase::GameEnded, |ctx: &mut TurnContext| {
            ctx.emit(EngineOutput::GameEnded);
            Ok(())
        });

        Self {
            machine,
            ctx: TurnContext {
                peer_id,
                is_host,
                state: None,
                outputs: Vec::new(),
                pending_prompt: None,
                next_token: 1,
            },
            last_step: None,
            proposed_from: None,
        }
    }

    /// Adds a handler that runs after the built-in one for `phase`.
    pub fn on_turn_phase<F>(&mut self, phase: TurnPhase, handler: F)
    where
        F: FnMut(&mut TurnContext) -> Result<(), EngineError> + Send + 'static,
    {
        self.machine.register_turn_phase_handler(phase, handler);
    }

    /// Adds a handler for entering a game phase.
    pub fn on_game_phase<F>(&mut self, phase: GamePhase, handler: F)
    where
        F: FnMut(&mut TurnContext) -> Result<(), EngineError> + Send + 'static,
    {
        self.machine.register_game_phase_handler(phase, handler);
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.ctx.peer_id
    }

    /// `true` if this peer acts for the turn in the current state.
    pub fn is_acting(&self) -> bool {
        self.ctx
            .state
            .as_ref()
            .and_then(acting_peer)
            .is_some_and(|peer| peer == self.ctx.peer_id)
    }

    /// The currently pending prompt, if any.
    pub fn pending_prompt(&self) -> Option<(PromptToken, &str)> {
        self.ctx
            .pending_prompt
            .as_ref()
            .map(|p| (p.token, p.message.as_str()))
    }

    /// Installs the authoritative `state` and, if this peer is acting and
    /// the turn moved on, runs the handler for the new turn phase.
    ///
    /// Returns what the handlers produced: usually one
    /// [`EngineOutput::Propose`], or a notification such as
    /// [`EngineOutput::AwaitingRoll`] when the turn waits for input.
    pub fn update(&mut self, state: GameState) -> Result<Vec<EngineOutput>, EngineError> {
        let key = StepKey::of(&state);
        let game_phase = state.game_phase;
        let turn_phase = state.turn_phase;

        let superseded = self.proposed_from.is_some_and(|base| state.version > base);
        let game_changed = !self.machine.is_in_game_phase(game_phase);
        let step_changed = game_changed
            || !self.machine.is_in_turn_phase(turn_phase)
            || self.last_step.as_ref() != Some(&key)
            || superseded;

        self.ctx.state = Some(state);
        self.last_step = Some(key);
        if turn_phase != TurnPhase::ProcessingEvent {
            self.ctx.pending_prompt = None;
        }

        if game_changed {
            self.machine.transition_game_phase(game_phase, &mut self.ctx)?;
        }

        let runs = game_phase == GamePhase::InGame && step_changed && self.is_acting();
        if runs {
            if superseded && self.machine.is_in_turn_phase(turn_phase) {
                tracing::debug!(%turn_phase, "own proposal was superseded, retrying step");
            }
            match self.machine.transition_turn_phase(turn_phase, &mut self.ctx) {
                Ok(()) => {}
                Err(EngineError::MissingCurrentPlayer) => {
                    tracing::warn!(%turn_phase, "no current player, transition abandoned");
                }
                Err(error) => {
                    self.ctx.outputs.clear();
                    return Err(error);
                }
            }
        } else {
            self.machine.init(game_phase, turn_phase);
        }

        let outputs: Vec<EngineOutput> = self.ctx.outputs.drain(..).collect();
        if !self.track_proposal(&outputs) && (runs || superseded) {
            self.proposed_from = None;
        }
        Ok(outputs)
    }

    /// Remembers the base version of a proposal in `outputs`, if any.
    fn track_proposal(&mut self, outputs: &[EngineOutput]) -> bool {
        let base = outputs.iter().find_map(|output| match output {
            EngineOutput::Propose(next) => Some(next.version),
            _ => None,
        });
        if base.is_some() {
            self.proposed_from = base;
        }
        base.is_some()
    }

    /// Rolls the replicated die for the acting player.
    pub fn roll(&mut self) -> Result<Vec<EngineOutput>, EngineError> {
        let mut next = self.begin_input(TurnPhase::WaitingForMove)?;
        let sides = next.settings.dice_sides;
        let roll = next.random_generator.roll_die(sides);
        self.apply_roll(next, roll)
    }

    /// Uses a roll produced outside the engine.
    pub fn roll_value(&mut self, roll: u32) -> Result<Vec<EngineOutput>, EngineError> {
        let next = self.begin_input(TurnPhase::WaitingForMove)?;
        self.apply_roll(next, roll)
    }

    /// Moves the acting player to one of the connected spaces.
    pub fn choose_destination(&mut self, space_id: SpaceId) -> Result<Vec<EngineOutput>, EngineError> {
        let mut next = self.begin_input(TurnPhase::PlayerChoosingDestination)?;
        let from = current_space(&next)?;
        let reachable = next
            .board
            .space(from)
            .is_some_and(|space| space.connections.contains(&space_id));
        if !reachable {
            return Err(EngineError::InvalidDestination(space_id));
        }
        step_to(&mut next, space_id)?;
        let outputs = vec![EngineOutput::Propose(next)];
        self.track_proposal(&outputs);
        Ok(outputs)
    }

    /// Acknowledges a prompt and lets event processing continue.
    pub fn resume(&mut self, token: PromptToken) -> Result<Vec<EngineOutput>, EngineError> {
        let pending = match &self.ctx.pending_prompt {
            Some(pending) if pending.token == token => pending.clone(),
            _ => return Err(EngineError::UnknownToken(token)),
        };
        let mut next = self.begin_input(TurnPhase::ProcessingEvent)?;
        events::complete(&mut next, &pending.event)?;
        next.turn_phase = TurnPhase::ProcessingEvents;
        self.ctx.pending_prompt = None;
        tracing::debug!(%token, "prompt acknowledged");
        let outputs = vec![EngineOutput::Propose(next)];
        self.track_proposal(&outputs);
        Ok(outputs)
    }

    fn begin_input(&self, expected: TurnPhase) -> Result<GameState, EngineError> {
        let state = self.ctx.state()?;
        if state.game_phase != GamePhase::InGame {
            return Err(EngineError::NotInGame(state.game_phase));
        }
        if state.turn_phase != expected {
            return Err(EngineError::WrongPhase {
                expected,
                actual: state.turn_phase,
            });
        }
        if !self.is_acting() {
            return Err(EngineError::NotActing(self.ctx.peer_id.clone()));
        }
        self.ctx.next_state()
    }

    fn apply_roll(&mut self, mut next: GameState, roll: u32) -> Result<Vec<EngineOutput>, EngineError> {
        let player = next
            .current_player_mut()
            .ok_or(EngineError::MissingCurrentPlayer)?;
        let bonus = player.take_roll_bonus();
        let player_id = player.player_id.clone();
        let moves = u32::try_from((i64::from(roll) + i64::from(bonus)).max(0)).unwrap_or(u32::MAX);

        next.remaining_moves = moves;
        next.moves_taken_this_turn = 0;
        next.turn_phase = TurnPhase::ProcessingEvents;
        tracing::info!(%player_id, roll, bonus, moves, "rolled");

        let outputs = vec![
            EngineOutput::Rolled {
                player_id,
                roll,
                moves,
            },
            EngineOutput::Propose(next),
        ];
        self.track_proposal(&outputs);
        Ok(outputs)
    }
}

impl GameEngine for TurnBasedGameEngine {
    fn state_type(&self) -> StateType {
        StateType::TurnBased
    }

    fn update(&mut self, state: GameState) -> Result<Vec<EngineOutput>, EngineError> {
        TurnBasedGameEngine::update(self, state)
    }

    fn input(&mut self, input: EngineInput) -> Result<Vec<EngineOutput>, EngineError> {
        match input {
            EngineInput::Roll => self.roll(),
            EngineInput::RollValue(value) => self.roll_value(value),
            EngineInput::ChooseDestination(space_id) => self.choose_destination(space_id),
            EngineInput::Acknowledge(token) => self.resume(token),
        }
    }

    fn acting_peer(&self, state: &GameState) -> Option<PeerId> {
        acting_peer(state)
    }

    fn state(&self) -> Option<&GameState> {
        self.ctx.state.as_ref()
    }
}

fn current_space(state: &GameState) -> Result<SpaceId, EngineError> {
    let player = state.current_player().ok_or(EngineError::MissingCurrentPlayer)?;
    Ok(player.current_space_id.unwrap_or(state.board.start_space_id))
}

/// Moves the current player one space and hands control back to event
/// processing.
fn step_to(next: &mut GameState, space_id: SpaceId) -> Result<(), EngineError> {
    let player = next
        .current_player_mut()
        .ok_or(EngineError::MissingCurrentPlayer)?;
    player.current_space_id = Some(space_id);
    next.remaining_moves = next.remaining_moves.saturating_sub(1);
    next.moves_taken_this_turn += 1;
    next.turn_phase = TurnPhase::ProcessingEvents;
    Ok(())
}

// ---------------------------------------------------------------------------
// Phase handlers
// ---------------------------------------------------------------------------

/// `CHANGE_TURN`: decides whether the current player plays this turn.
///
/// A pending skip turns an active player into a skipping one. Skipping
/// and completed players go straight to `END_TURN`; everyone else
/// begins a turn. If nobody can play at all, nothing is proposed and the
/// game waits for a reclaim.
fn change_turn(ctx: &mut TurnContext) -> Result<(), EngineError> {
    let state = ctx.state()?;
    let can_play = state
        .players
        .iter()
        .any(|p| matches!(p.state, PlayerState::Active | PlayerState::SkippingTurn));
    if !can_play {
        tracing::warn!("no player can take a turn, waiting");
        return Ok(());
    }

    let mut next = ctx.next_state()?;
    let player = next
        .current_player_mut()
        .ok_or(EngineError::MissingCurrentPlayer)?;

    if player.state == PlayerState::Active && player.has_pending_skip() {
        player.state = PlayerState::SkippingTurn;
    }

    if player.is_skip_eligible() {
        tracing::debug!(player_id = %player.player_id, state = ?player.state, "skipping turn");
        if player.state == PlayerState::SkippingTurn {
            player.consume_skip();
        }
        next.turn_phase = TurnPhase::EndTurn;
    } else {
        next.turn_phase = TurnPhase::BeginTurn;
    }
    ctx.propose(next);
    Ok(())
}

/// `BEGIN_TURN`: clears the move counters.
fn begin_turn(ctx: &mut TurnContext) -> Result<(), EngineError> {
    let mut next = ctx.next_state()?;
    next.remaining_moves = 0;
    next.moves_taken_this_turn = 0;
    next.turn_phase = TurnPhase::WaitingForMove;
    ctx.propose(next);
    Ok(())
}

/// `WAITING_FOR_MOVE`: asks the UI for a roll. Nothing is proposed until
/// the player rolls.
fn waiting_for_move(ctx: &mut TurnContext) -> Result<(), EngineError> {
    if ctx.forfeit_if_disconnected()? {
        return Ok(());
    }
    let player_id = ctx.current_player()?.player_id.clone();
    ctx.emit(EngineOutput::AwaitingRoll { player_id });
    Ok(())
}

/// `PROCESSING_EVENTS`: looks for events that fire at the player's space
/// and phase.
///
/// With none left the event flags are cleared and movement continues;
/// otherwise `PROCESSING_EVENT` handles them one by one.
fn processing_events(ctx: &mut TurnContext) -> Result<(), EngineError> {
    let triggered = events::determine_triggered_events(ctx.state()?, &ctx.peer_id);
    let mut next = ctx.next_state()?;
    if triggered.is_empty() {
        events::reset_events(&mut next);
        next.turn_phase = TurnPhase::ProcessingMove;
    } else {
        tracing::debug!(count = triggered.len(), "events triggered");
        next.turn_phase = TurnPhase::ProcessingEvent;
    }
    if let Some(state) = ctx.state.as_mut() {
        state.triggered_events = triggered;
    }
    ctx.propose(next);
    Ok(())
}

/// `PROCESSING_EVENT`: runs the first triggered event.
///
/// Actions that finish at once mark the event completed and return to
/// `PROCESSING_EVENTS`. Actions that need the player to acknowledge
/// something open a prompt instead; the turn stays here until
/// [`TurnBasedGameEngine::resume`] is called with its token. When the
/// same state comes back while a prompt is open, the prompt is emitted
/// again rather than the action run twice.
fn processing_event(ctx: &mut TurnContext) -> Result<(), EngineError> {
    let triggered = events::determine_triggered_events(ctx.state()?, &ctx.peer_id);
    let Some(first) = triggered.first().copied() else {
        // An earlier action already changed what fires.
        let mut next = ctx.next_state()?;
        next.turn_phase = TurnPhase::ProcessingEvents;
        ctx.propose(next);
        return Ok(());
    };

    if let Some(pending) = ctx.pending_prompt.clone() {
        if pending.event == first {
            let player_id = ctx.current_player()?.player_id.clone();
            ctx.emit(EngineOutput::Prompt {
                token: pending.token,
                player_id,
                message: pending.message,
            });
            return Ok(());
        }
    }
    if ctx.forfeit_if_disconnected()? {
        return Ok(());
    }

    let mut next = ctx.next_state()?;
    match events::execute(&mut next, &first)? {
        events::ActionOutcome::Completed => {
            events::complete(&mut next, &first)?;
            next.turn_phase = TurnPhase::ProcessingEvents;
            ctx.propose(next);
        }
        events::ActionOutcome::AwaitingAcknowledgement { message } => {
            let token = PromptToken(ctx.next_token);
            ctx.next_token += 1;
            ctx.pending_prompt = Some(PendingPrompt {
                token,
                event: first,
                message: message.clone(),
            });
            let player_id = ctx.current_player()?.player_id.clone();
            ctx.emit(EngineOutput::Prompt {
                token,
                player_id,
                message,
            });
        }
    }
    Ok(())
}

/// `PROCESSING_MOVE`: spends one move.
///
/// One connection means the piece just moves. Several mean the player
/// has to pick. No remaining moves end the turn.
fn processing_move(ctx: &mut TurnContext) -> Result<(), EngineError> {
    let mut next = ctx.next_state()?;
    if next.remaining_moves == 0 {
        next.turn_phase = TurnPhase::EndTurn;
        ctx.propose(next);
        return Ok(());
    }

    let from = current_space(&next)?;
    let connections = next
        .board
        .space(from)
        .map(|space| space.connections.clone())
        .ok_or(boardsync_state::StateError::UnknownSpace(from))?;

    match connections.as_slice() {
        [] => {
            // Dead end: the rest of the roll is lost.
            next.remaining_moves = 0;
            next.turn_phase = TurnPhase::ProcessingEvents;
        }
        [only] => step_to(&mut next, *only)?,
        _ => next.turn_phase = TurnPhase::PlayerChoosingDestination,
    }
    ctx.propose(next);
    Ok(())
}

fn choosing_destination(ctx: &mut TurnContext) -> Result<(), EngineError> {
    if ctx.forfeit_if_disconnected()? {
        return Ok(());
    }
    let state = ctx.state()?;
    let from = current_space(state)?;
    let options = state
        .board
        .space(from)
        .map(|space| space.connections.clone())
        .unwrap_or_default();
    let player_id = ctx.current_player()?.player_id.clone();
    ctx.emit(EngineOutput::ChooseDestination { player_id, options });
    Ok(())
}

/// `END_TURN`: counts the turn and hands over, or ends the game once
/// every player has completed.
fn end_turn(ctx: &mut TurnContext) -> Result<(), EngineError> {
    let mut next = ctx.next_state()?;
    events::reset_events(&mut next);
    next.remaining_moves = 0;
    next.moves_taken_this_turn = 0;
    next.turn_phase = TurnPhase::ChangeTurn;

    if next.all_players_completed() {
        tracing::info!("all players completed, game over");
        next.game_phase = GamePhase::GameEnded;
    } else {
        let player = next
            .current_player_mut()
            .ok_or(EngineError::MissingCurrentPlayer)?;
        player.turns_taken += 1;
    }
    ctx.propose(next);
    Ok(())
}
