//! Event processing: find what fires, run one action, reset afterwards.
//!
//! Triggered events are never queued. The engine recomputes them before
//! every step because an action can move the player, change the move
//! count or end the game, any of which changes what fires next.

use boardsync_protocol::PeerId;
use boardsync_state::{
    Action, EventState, GameState, PlayerEffect, PlayerState, TriggerContext, TriggeredEvent,
};

use crate::EngineError;

/// How an executed action finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action took effect; the event can be completed right away.
    Completed,
    /// The acting peer has to acknowledge `message` before the event
    /// completes.
    AwaitingAcknowledgement { message: String },
}

/// Collects every ready event whose trigger holds, highest priority
/// first. Ties keep board order. Pure.
pub fn determine_triggered_events(state: &GameState, peer_id: &PeerId) -> Vec<TriggeredEvent> {
    let mut triggered = Vec::new();
    for space in &state.board.spaces {
        let ctx = TriggerContext {
            state,
            space,
            peer_id,
        };
        for (event_index, event) in space.events.iter().enumerate() {
            if event.check_trigger(&ctx) {
                triggered.push(TriggeredEvent {
                    space_id: space.id,
                    event_index,
                    priority: event.priority,
                });
            }
        }
    }
    // `sort_by` is stable, so equal priorities stay in scan order.
    triggered.sort_by(|a, b| b.priority.cmp(&a.priority));
    triggered
}

/// Applies the event's action to the current player.
///
/// The event is not marked completed here; call [`complete`] once the
/// outcome is [`ActionOutcome::Completed`] or the prompt was acknowledged.
pub fn execute(state: &mut GameState, triggered: &TriggeredEvent) -> Result<ActionOutcome, EngineError> {
    let action = state
        .board
        .event(triggered.space_id, triggered.event_index)
        .ok_or(EngineError::UnknownEvent {
            space_id: triggered.space_id,
            index: triggered.event_index,
        })?
        .action
        .clone();

    if let Action::Teleport { space_id } = action {
        if state.board.space(space_id).is_none() {
            return Err(EngineError::InvalidDestination(space_id));
        }
    }

    let remaining_moves = state.remaining_moves;
    let player = state
        .current_player_mut()
        .ok_or(EngineError::MissingCurrentPlayer)?;
    tracing::debug!(player_id = %player.player_id, ?action, "executing event action");

    let outcome = match action {
        Action::Prompt { message } => return Ok(ActionOutcome::AwaitingAcknowledgement { message }),
        Action::AddMoves { amount } => {
            let moves = (i64::from(remaining_moves) + i64::from(amount)).max(0);
            state.remaining_moves = u32::try_from(moves).unwrap_or(u32::MAX);
            ActionOutcome::Completed
        }
        Action::Teleport { space_id } => {
            player.current_space_id = Some(space_id);
            ActionOutcome::Completed
        }
        Action::SkipTurns { turns } => {
            if turns > 0 {
                player.effects.push(PlayerEffect::SkipTurns { remaining: turns });
            }
            ActionOutcome::Completed
        }
        Action::ModifyRolls { bonus, turns } => {
            if turns > 0 {
                player.effects.push(PlayerEffect::RollModifier {
                    bonus,
                    remaining_rolls: turns,
                });
            }
            ActionOutcome::Completed
        }
        Action::FinishGame => {
            player.state = PlayerState::CompletedGame;
            state.remaining_moves = 0;
            ActionOutcome::Completed
        }
    };
    Ok(outcome)
}

/// Marks an event completed so it stays out of the loop until
/// [`reset_events`].
pub fn complete(state: &mut GameState, triggered: &TriggeredEvent) -> Result<(), EngineError> {
    let event = state
        .board
        .event_mut(triggered.space_id, triggered.event_index)
        .ok_or(EngineError::UnknownEvent {
            space_id: triggered.space_id,
            index: triggered.event_index,
        })?;
    event.state = EventState::CompletedAction;
    Ok(())
}

/// Flips every completed event back to ready.
pub fn reset_events(state: &mut GameState) -> usize {
    state.board.reset_events()
}

#[cfg(test)]
mod tests {
    use boardsync_state::{
        Board, GameEvent, GameRng, GameSettings, Player, PlayerId, Space, SpaceId, Trigger,
    };

    use super::*;

    fn state_on(board: Board) -> GameState {
        let mut state = GameState::new(board, GameSettings::default(), GameRng::seed_from_u64(1)).unwrap();
        state.players.push(Player::new(
            PlayerId::from("p1"),
            PeerId::from("peer-1"),
            "Ann",
            "#000000",
            "#000000",
        ));
        state.place_players_at_start();
        state
    }

    fn landed_on(board: Board, space: u32) -> GameState {
        let mut state = state_on(board);
        state.players[0].current_space_id = Some(SpaceId(space));
        state.moves_taken_this_turn = 1;
        state.remaining_moves = 0;
        state
    }

    fn peer() -> PeerId {
        PeerId::from("peer-1")
    }

    #[test]
    fn test_determine_sorts_by_priority_then_scan_order() {
        let low = GameEvent::new(Trigger::OnLand, Action::AddMoves { amount: 1 }).with_priority(1);
        let high = GameEvent::new(Trigger::OnLand, Action::FinishGame).with_priority(9);
        let board = Board::new(
            "B",
            0,
            vec![
                Space::new(0, "start").connect_to(1),
                Space::new(1, "busy")
                    .with_event(low.clone())
                    .with_event(high)
                    .with_event(low),
            ],
        );
        let state = landed_on(board, 1);

        let triggered = determine_triggered_events(&state, &peer());
        let order: Vec<_> = triggered.iter().map(|t| t.event_index).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn test_determine_is_pure() {
        let event = GameEvent::new(Trigger::OnLand, Action::FinishGame);
        let board = Board::new("B", 0, vec![Space::new(0, "s").with_event(event)]);
        let state = landed_on(board, 0);
        let before = state.clone();

        let first = determine_triggered_events(&state, &peer());
        let second = determine_triggered_events(&state, &peer());
        assert_eq!(first, second);
        assert_eq!(state, before);
    }

    #[test]
    fn test_completed_event_is_excluded_until_reset() {
        let event = GameEvent::new(Trigger::OnLand, Action::AddMoves { amount: 0 });
        let board = Board::new("B", 0, vec![Space::new(0, "s").with_event(event)]);
        let mut state = landed_on(board, 0);

        let triggered = determine_triggered_events(&state, &peer());
        assert_eq!(triggered.len(), 1);
        assert_eq!(execute(&mut state, &triggered[0]).unwrap(), ActionOutcome::Completed);
        complete(&mut state, &triggered[0]).unwrap();

        for _ in 0..3 {
            assert!(determine_triggered_events(&state, &peer()).is_empty());
        }

        assert_eq!(reset_events(&mut state), 1);
        assert_eq!(determine_triggered_events(&state, &peer()).len(), 1);
    }

    #[test]
    fn test_execute_actions() {
        let board = Board::linear("B", 4);
        let mut state = landed_on(board, 1);
        state.board.spaces[1].events = vec![
            GameEvent::new(Trigger::OnLand, Action::AddMoves { amount: -5 }),
            GameEvent::new(Trigger::OnLand, Action::Teleport { space_id: SpaceId(3) }),
            GameEvent::new(Trigger::OnLand, Action::SkipTurns { turns: 2 }),
            GameEvent::new(Trigger::OnLand, Action::ModifyRolls { bonus: 1, turns: 1 }),
            GameEvent::new(Trigger::OnLand, Action::Prompt { message: "Hi".into() }),
            GameEvent::new(Trigger::OnLand, Action::FinishGame),
        ];
        let at = |event_index| TriggeredEvent {
            space_id: SpaceId(1),
            event_index,
            priority: 0,
        };

        state.remaining_moves = 2;
        execute(&mut state, &at(0)).unwrap();
        assert_eq!(state.remaining_moves, 0);

        execute(&mut state, &at(1)).unwrap();
        assert_eq!(state.players[0].current_space_id, Some(SpaceId(3)));

        execute(&mut state, &at(2)).unwrap();
        execute(&mut state, &at(3)).unwrap();
        assert_eq!(
            state.players[0].effects,
            vec![
                PlayerEffect::SkipTurns { remaining: 2 },
                PlayerEffect::RollModifier {
                    bonus: 1,
                    remaining_rolls: 1
                },
            ]
        );

        let outcome = execute(&mut state, &at(4)).unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::AwaitingAcknowledgement {
                message: "Hi".into()
            }
        );

        execute(&mut state, &at(5)).unwrap();
        assert_eq!(state.players[0].state, PlayerState::CompletedGame);
    }

    #[test]
    fn test_execute_unknown_event() {
        let mut state = landed_on(Board::linear("B", 2), 0);
        let missing = TriggeredEvent {
            space_id: SpaceId(0),
            event_index: 4,
            priority: 0,
        };
        assert!(matches!(
            execute(&mut state, &missing),
            Err(EngineError::UnknownEvent { index: 4, .. })
        ));
        assert!(complete(&mut state, &missing).is_err());
    }
}
