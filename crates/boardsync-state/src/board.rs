//! Static board graph plus the events attached to its spaces.
//!
//! The board travels inside every game state. Its shape never changes
//! during a game; only the `state` flag of each [`GameEvent`] does.

use std::collections::HashSet;
use std::fmt;

use boardsync_protocol::PeerId;
use serde::{Deserialize, Serialize};

use crate::{GameState, StateError};

/// Identifier of a space on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space-{}", self.0)
    }
}

/// Whether an event can still fire in the current processing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    #[default]
    Ready,
    CompletedAction,
}

/// What has to happen for an event to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trigger {
    /// The current player stopped on the space.
    OnLand,
    /// The current player moved onto the space and keeps moving.
    OnPass,
}

/// What an event does once it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Action {
    /// Shows a message and waits for the acting peer to acknowledge it.
    Prompt { message: String },
    /// Adds (or with a negative amount, removes) remaining moves.
    AddMoves { amount: i32 },
    /// Moves the current player to another space.
    Teleport { space_id: SpaceId },
    /// The current player skips its next `turns` turns.
    SkipTurns { turns: u32 },
    /// Adds `bonus` to the current player's next `turns` rolls.
    ModifyRolls { bonus: i32, turns: u32 },
    /// The current player completes the game.
    FinishGame,
}

/// Everything a trigger may look at.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub state: &'a GameState,
    pub space: &'a Space,
    /// The peer evaluating the trigger.
    pub peer_id: &'a PeerId,
}

impl Trigger {
    pub fn check(&self, ctx: &TriggerContext<'_>) -> bool {
        let Some(player) = ctx.state.current_player() else {
            return false;
        };
        if player.current_space_id != Some(ctx.space.id) || ctx.state.moves_taken_this_turn == 0 {
            return false;
        }
        match self {
            Self::OnLand => ctx.state.remaining_moves == 0,
            Self::OnPass => ctx.state.remaining_moves > 0,
        }
    }
}

/// A trigger/action pair attached to a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    /// Higher fires first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub state: EventState,
    pub trigger: Trigger,
    pub action: Action,
}

impl GameEvent {
    pub fn new(trigger: Trigger, action: Action) -> Self {
        Self {
            priority: 0,
            state: EventState::Ready,
            trigger,
            action,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// A completed event never fires again before it is reset.
    pub fn check_trigger(&self, ctx: &TriggerContext<'_>) -> bool {
        self.state == EventState::Ready && self.trigger.check(ctx)
    }
}

/// A node of the board graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: SpaceId,
    #[serde(default)]
    pub name: String,
    /// Directed edges, by target id.
    #[serde(default)]
    pub connections: Vec<SpaceId>,
    #[serde(default)]
    pub events: Vec<GameEvent>,
}

impl Space {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: SpaceId(id),
            name: name.into(),
            connections: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn connect_to(mut self, target: u32) -> Self {
        self.connections.push(SpaceId(target));
        self
    }

    pub fn with_event(mut self, event: GameEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// The map a game is played on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub name: String,
    pub start_space_id: SpaceId,
    pub spaces: Vec<Space>,
}

impl Board {
    pub fn new(name: impl Into<String>, start_space_id: u32, spaces: Vec<Space>) -> Self {
        Self {
            name: name.into(),
            start_space_id: SpaceId(start_space_id),
            spaces,
        }
    }

    /// A straight track `0 → 1 → … → len-1` starting at space 0.
    pub fn linear(name: impl Into<String>, len: u32) -> Self {
        let spaces = (0..len)
            .map(|i| {
                let space = Space::new(i, format!("Space {i}"));
                if i + 1 < len { space.connect_to(i + 1) } else { space }
            })
            .collect();
        Self::new(name, 0, spaces)
    }

    /// Decodes a board definition and validates it.
    pub fn from_json(value: serde_json::Value) -> Result<Self, StateError> {
        let board: Self = serde_json::from_value(value)?;
        board.validate()?;
        Ok(board)
    }

    pub fn validate(&self) -> Result<(), StateError> {
        if self.spaces.is_empty() {
            return Err(StateError::InvalidBoard("board has no spaces".into()));
        }

        let mut ids = HashSet::with_capacity(self.spaces.len());
        for space in &self.spaces {
            if !ids.insert(space.id) {
                return Err(StateError::InvalidBoard(format!("duplicate {}", space.id)));
            }
        }

        if !ids.contains(&self.start_space_id) {
            return Err(StateError::InvalidBoard(format!(
                "start {} does not exist",
                self.start_space_id
            )));
        }

        for space in &self.spaces {
            let targets = space.connections.iter().copied().chain(
                space.events.iter().filter_map(|e| match e.action {
                    Action::Teleport { space_id } => Some(space_id),
                    _ => None,
                }),
            );
            for target in targets {
                if !ids.contains(&target) {
                    return Err(StateError::InvalidBoard(format!(
                        "{} points at missing {target}",
                        space.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn space(&self, id: SpaceId) -> Option<&Space> {
        self.spaces.iter().find(|s| s.id == id)
    }

    pub fn space_mut(&mut self, id: SpaceId) -> Option<&mut Space> {
        self.spaces.iter_mut().find(|s| s.id == id)
    }

    pub fn event(&self, space_id: SpaceId, index: usize) -> Option<&GameEvent> {
        self.space(space_id)?.events.get(index)
    }

    pub fn event_mut(&mut self, space_id: SpaceId, index: usize) -> Option<&mut GameEvent> {
        self.space_mut(space_id)?.events.get_mut(index)
    }

    /// Flips every completed event back to ready and returns how many
    /// were reset.
    pub fn reset_events(&mut self) -> usize {
        let mut reset = 0;
        for event in self.spaces.iter_mut().flat_map(|s| s.events.iter_mut()) {
            if event.state == EventState::CompletedAction {
                event.state = EventState::Ready;
                reset += 1;
            }
        }
        if reset > 0 {
            tracing::trace!(reset, "board events reset");
        }
        reset
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_linear_board_is_valid_chain() {
        let board = Board::linear("Track", 3);
        board.validate().unwrap();
        assert_eq!(board.space(SpaceId(0)).unwrap().connections, vec![SpaceId(1)]);
        assert!(board.space(SpaceId(2)).unwrap().connections.is_empty());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let board = Board::new("Bad", 0, vec![Space::new(0, "a"), Space::new(0, "b")]);
        assert!(matches!(board.validate(), Err(StateError::InvalidBoard(_))));
    }

    #[test]
    fn test_validate_rejects_missing_start_and_dangling_edges() {
        let board = Board::new("Bad", 7, vec![Space::new(0, "a")]);
        assert!(board.validate().is_err());

        let board = Board::new("Bad", 0, vec![Space::new(0, "a").connect_to(4)]);
        assert!(board.validate().is_err());

        let teleport = GameEvent::new(Trigger::OnLand, Action::Teleport { space_id: SpaceId(9) });
        let board = Board::new("Bad", 0, vec![Space::new(0, "a").with_event(teleport)]);
        assert!(board.validate().is_err());
    }

    #[test]
    fn test_board_from_json_with_events() {
        let board = Board::from_json(json!({
            "name": "Mini",
            "startSpaceId": 0,
            "spaces": [
                {"id": 0, "connections": [1]},
                {"id": 1, "events": [
                    {"priority": 3, "trigger": {"type": "ON_LAND"},
                     "action": {"type": "ADD_MOVES", "amount": 2}}
                ]}
            ]
        }))
        .unwrap();

        let event = board.event(SpaceId(1), 0).unwrap();
        assert_eq!(event.priority, 3);
        assert_eq!(event.state, EventState::Ready);
        assert_eq!(event.action, Action::AddMoves { amount: 2 });
    }

    #[test]
    fn test_reset_events_counts_completed() {
        let event = GameEvent::new(Trigger::OnPass, Action::FinishGame);
        let mut board = Board::new(
            "B",
            0,
            vec![Space::new(0, "a").with_event(event.clone()).with_event(event)],
        );
        board.event_mut(SpaceId(0), 1).unwrap().state = EventState::CompletedAction;

        assert_eq!(board.reset_events(), 1);
        assert_eq!(board.reset_events(), 0);
        assert_eq!(board.event(SpaceId(0), 1).unwrap().state, EventState::Ready);
    }

    #[test]
    fn test_action_wire_shape() {
        let action = Action::ModifyRolls { bonus: -1, turns: 2 };
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"type": "MODIFY_ROLLS", "bonus": -1, "turns": 2})
        );
        let action: Action = serde_json::from_value(json!({"type": "TELEPORT", "spaceId": 4})).unwrap();
        assert_eq!(action, Action::Teleport { space_id: SpaceId(4) });
    }
}
