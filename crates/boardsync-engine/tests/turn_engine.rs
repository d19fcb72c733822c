//! Turn engine behaviour across several peers.
//!
//! A small in-process table plays the host's role: it hands every
//! engine the authoritative state, commits the single proposal that
//! comes back, and repeats until nobody proposes anymore.

use boardsync_engine::{EngineError, EngineOutput, PromptToken, TurnBasedGameEngine};
use boardsync_protocol::PeerId;
use boardsync_state::{
    Action, Board, EventState, GameEvent, GamePhase, GameRng, GameSettings, GameState, Player,
    PlayerEffect, PlayerId, PlayerState, Space, SpaceId, Trigger, TurnPhase,
};

struct Table {
    engines: Vec<TurnBasedGameEngine>,
    state: GameState,
    history: Vec<GameState>,
    outputs: Vec<EngineOutput>,
}

impl Table {
    /// `players` are `(player id, owning peer)` pairs.
    fn start(board: Board, players: &[(&str, &str)]) -> Self {
        let mut state = GameState::new(
            board,
            GameSettings::default(),
            GameRng::seed_from_u64(11),
        )
        .unwrap();
        for (player_id, peer) in players {
            state.players.push(Player::new(
                PlayerId::from(*player_id),
                PeerId::from(*peer),
                player_id.to_uppercase(),
                "#aa0000",
                "#0000aa",
            ));
        }
        state.place_players_at_start();
        state.game_phase = GamePhase::InGame;
        state.turn_phase = TurnPhase::ChangeTurn;
        state.bump_version(0);

        let mut engines = vec![TurnBasedGameEngine::new(PeerId::host(), true)];
        for (_, peer) in players {
            if !engines.iter().any(|e| e.peer_id().as_str() == *peer) {
                engines.push(TurnBasedGameEngine::new(PeerId::from(*peer), false));
            }
        }

        let mut table = Self {
            engines,
            state,
            history: Vec::new(),
            outputs: Vec::new(),
        };
        table.settle();
        table
    }

    fn commit(&mut self, mut next: GameState) {
        assert_eq!(next.version, self.state.version, "proposal must build on the latest state");
        next.bump_version(next.version * 10);
        self.history.push(next.clone());
        self.state = next;
    }

    fn settle(&mut self) {
        for _ in 0..500 {
            let mut proposal = None;
            for engine in &mut self.engines {
                for output in engine.update(self.state.clone()).unwrap() {
                    match output {
                        EngineOutput::Propose(next) => {
                            assert!(proposal.is_none(), "two peers advanced the same step");
                            proposal = Some(next);
                        }
                        other => self.outputs.push(other),
                    }
                }
            }
            match proposal {
                Some(next) => self.commit(next),
                None => return,
            }
        }
        panic!("turn loop did not settle");
    }

    fn engine(&mut self, peer: &str) -> &mut TurnBasedGameEngine {
        self.engines
            .iter_mut()
            .find(|e| e.peer_id().as_str() == peer)
            .unwrap()
    }

    /// Runs an external input on one peer, commits its proposal and
    /// settles.
    fn input<F>(&mut self, peer: &str, f: F)
    where
        F: FnOnce(&mut TurnBasedGameEngine) -> Result<Vec<EngineOutput>, EngineError>,
    {
        let outputs = f(self.engine(peer)).unwrap();
        for output in outputs {
            match output {
                EngineOutput::Propose(next) => self.commit(next),
                other => self.outputs.push(other),
            }
        }
        self.settle();
    }

    fn current(&self) -> &Player {
        self.state.current_player().unwrap()
    }

    fn player(&self, id: &str) -> &Player {
        self.state.player(&PlayerId::from(id)).unwrap()
    }

    fn take_prompt(&mut self) -> Option<(PromptToken, String)> {
        let index = self
            .outputs
            .iter()
            .position(|o| matches!(o, EngineOutput::Prompt { .. }))?;
        match self.outputs.remove(index) {
            EngineOutput::Prompt { token, message, .. } => Some((token, message)),
            _ => None,
        }
    }
}

fn two_players(board: Board) -> Table {
    Table::start(board, &[("a", "peer-a"), ("b", "peer-b")])
}

#[test]
fn test_lobby_to_roll_cycle() {
    let mut table = two_players(Board::linear("Plain", 10));

    assert_eq!(table.state.turn_phase, TurnPhase::WaitingForMove);
    assert_eq!(table.current().player_id, PlayerId::from("a"));
    assert!(table.outputs.contains(&EngineOutput::AwaitingRoll {
        player_id: PlayerId::from("a")
    }));

    let outputs = table.engine("peer-a").roll_value(4).unwrap();
    assert_eq!(
        outputs[0],
        EngineOutput::Rolled {
            player_id: PlayerId::from("a"),
            roll: 4,
            moves: 4
        }
    );
    let EngineOutput::Propose(rolled) = outputs[1].clone() else {
        panic!("roll should propose");
    };
    assert_eq!(rolled.turn_phase, TurnPhase::ProcessingEvents);
    assert_eq!(rolled.remaining_moves, 4);
    table.commit(rolled);

    // No events on the board, so the next step is a move.
    let state = table.state.clone();
    let outputs = table.engine("peer-a").update(state).unwrap();
    let EngineOutput::Propose(next) = &outputs[0] else {
        panic!("acting peer should propose");
    };
    assert_eq!(next.turn_phase, TurnPhase::ProcessingMove);
}

#[test]
fn test_full_turn_moves_and_passes_to_next_player() {
    let mut table = two_players(Board::linear("Plain", 10));
    table.input("peer-a", |e| e.roll_value(4));

    assert_eq!(table.player("a").current_space_id, Some(SpaceId(4)));
    assert_eq!(table.player("a").turns_taken, 1);
    assert_eq!(table.current().player_id, PlayerId::from("b"));
    assert_eq!(table.state.turn_phase, TurnPhase::WaitingForMove);
    assert_eq!(table.state.remaining_moves, 0);
}

#[test]
fn test_versions_strictly_increase() {
    let mut table = two_players(Board::linear("Plain", 10));
    table.input("peer-a", |e| e.roll_value(3));
    table.input("peer-b", |e| e.roll_value(2));

    let versions: Vec<u64> = table.history.iter().map(|s| s.version).collect();
    assert!(versions.windows(2).all(|w| w[1] == w[0] + 1), "{versions:?}");
}

#[test]
fn test_turn_order_is_fair() {
    let mut table = Table::start(
        Board::linear("Long", 100),
        &[("a", "peer-a"), ("b", "peer-b"), ("c", "peer-a")],
    );

    let mut order = Vec::new();
    for round in 1..=3u32 {
        for _ in 0..3 {
            let current = table.current().clone();
            order.push(current.player_id.as_str().to_string());
            let peer = current.peer_id.as_str().to_string();
            table.input(&peer, |e| e.roll_value(1));
        }
        for player in &table.state.players {
            assert_eq!(player.turns_taken, round);
        }
    }
    assert_eq!(order, ["a", "b", "c", "a", "b", "c", "a", "b", "c"]);
}

#[test]
fn test_skip_eligible_player_goes_straight_to_end_turn() {
    for state in [
        PlayerState::SkippingTurn,
        PlayerState::Spectating,
        PlayerState::CompletedGame,
        PlayerState::Disconnected,
    ] {
        let mut table = two_players(Board::linear("Plain", 10));
        let mut next = table.state.clone();
        next.player_mut(&PlayerId::from("b")).unwrap().state = state;
        table.commit(next);
        table.settle();

        let start = table.history.len();
        table.input("peer-a", |e| e.roll_value(1));

        let b_phases: Vec<TurnPhase> = table.history[start..]
            .iter()
            .filter(|s| s.current_player().unwrap().player_id == PlayerId::from("b"))
            .map(|s| s.turn_phase)
            .collect();
        assert_eq!(
            b_phases,
            vec![TurnPhase::ChangeTurn, TurnPhase::EndTurn],
            "{state:?}"
        );
        assert_eq!(table.player("b").turns_taken, 1);
        assert_eq!(table.current().player_id, PlayerId::from("a"));
    }
}

#[test]
fn test_skip_turns_event_skips_exactly_once() {
    let skip = GameEvent::new(Trigger::OnLand, Action::SkipTurns { turns: 1 });
    let board = Board::new(
        "Trap",
        0,
        vec![
            Space::new(0, "start").connect_to(1),
            Space::new(1, "trap").connect_to(2).with_event(skip),
            Space::new(2, "end"),
        ],
    );
    let mut table = two_players(board);

    table.input("peer-a", |e| e.roll_value(1));
    assert_eq!(
        table.player("a").effects,
        vec![PlayerEffect::SkipTurns { remaining: 1 }]
    );

    // b jumps the trap; a's next turn is consumed by the skip; b plays again.
    table.input("peer-b", |e| e.roll_value(2));
    assert_eq!(table.current().player_id, PlayerId::from("b"));
    assert_eq!(table.player("a").turns_taken, 2);
    assert!(table.player("a").effects.is_empty());
    assert_eq!(table.player("a").state, PlayerState::Active);

    table.input("peer-b", |e| e.roll_value(1));
    assert_eq!(table.current().player_id, PlayerId::from("a"));
    assert_eq!(table.state.turn_phase, TurnPhase::WaitingForMove);
}

#[test]
fn test_prompt_suspends_until_resumed_and_fires_once() {
    let prompt = GameEvent::new(
        Trigger::OnLand,
        Action::Prompt {
            message: "Watch out".into(),
        },
    );
    let board = Board::new(
        "Prompted",
        0,
        vec![
            Space::new(0, "start").connect_to(1),
            Space::new(1, "sign").connect_to(2).with_event(prompt),
            Space::new(2, "end"),
        ],
    );
    let mut table = two_players(board);
    table.input("peer-a", |e| e.roll_value(1));

    assert_eq!(table.state.turn_phase, TurnPhase::ProcessingEvent);
    let (token, message) = table.take_prompt().expect("prompt emitted");
    assert_eq!(message, "Watch out");
    assert!(table.take_prompt().is_none());

    // Only the acting peer may acknowledge.
    assert!(matches!(
        table.engine("peer-b").resume(token),
        Err(EngineError::UnknownToken(_))
    ));
    assert!(matches!(
        table.engine("peer-a").resume(PromptToken(token.0 + 100)),
        Err(EngineError::UnknownToken(_))
    ));

    table.input("peer-a", |e| e.resume(token));
    assert!(table.take_prompt().is_none(), "completed event must not re-fire");
    assert_eq!(table.current().player_id, PlayerId::from("b"));
    let event = table.state.board.event(SpaceId(1), 0).unwrap();
    assert_eq!(event.state, EventState::Ready, "events reset after the loop");
}

#[test]
fn test_pass_event_adds_moves() {
    let boost = GameEvent::new(Trigger::OnPass, Action::AddMoves { amount: 2 });
    let mut board = Board::linear("Boost", 10);
    board.spaces[1].events.push(boost);
    let mut table = two_players(board);

    table.input("peer-a", |e| e.roll_value(2));
    assert_eq!(table.player("a").current_space_id, Some(SpaceId(4)));
}

#[test]
fn test_branching_board_waits_for_destination() {
    let board = Board::new(
        "Fork",
        0,
        vec![
            Space::new(0, "fork").connect_to(1).connect_to(2),
            Space::new(1, "left"),
            Space::new(2, "right"),
        ],
    );
    let mut table = two_players(board);
    table.input("peer-a", |e| e.roll_value(1));

    assert_eq!(table.state.turn_phase, TurnPhase::PlayerChoosingDestination);
    assert!(table.outputs.contains(&EngineOutput::ChooseDestination {
        player_id: PlayerId::from("a"),
        options: vec![SpaceId(1), SpaceId(2)],
    }));

    assert!(matches!(
        table.engine("peer-a").choose_destination(SpaceId(0)),
        Err(EngineError::InvalidDestination(SpaceId(0)))
    ));

    table.input("peer-a", |e| e.choose_destination(SpaceId(2)));
    assert_eq!(table.player("a").current_space_id, Some(SpaceId(2)));
    assert_eq!(table.current().player_id, PlayerId::from("b"));
}

#[test]
fn test_inputs_from_wrong_peer_or_phase_are_rejected() {
    let mut table = two_players(Board::linear("Plain", 10));

    assert!(matches!(
        table.engine("peer-b").roll_value(3),
        Err(EngineError::NotActing(_))
    ));
    assert!(matches!(
        table.engine("peer-a").choose_destination(SpaceId(1)),
        Err(EngineError::WrongPhase {
            expected: TurnPhase::PlayerChoosingDestination,
            actual: TurnPhase::WaitingForMove
        })
    ));
}

#[test]
fn test_paused_game_freezes_turns() {
    let mut table = two_players(Board::linear("Plain", 10));
    let mut paused = table.state.clone();
    paused.game_phase = GamePhase::Paused;
    table.commit(paused);
    let before = table.history.len();
    table.settle();

    assert_eq!(table.history.len(), before, "nobody proposes while paused");
    assert!(matches!(
        table.engine("peer-a").roll_value(3),
        Err(EngineError::NotInGame(GamePhase::Paused))
    ));

    let mut resumed = table.state.clone();
    resumed.game_phase = GamePhase::InGame;
    table.commit(resumed);
    table.settle();
    table.input("peer-a", |e| e.roll_value(1));
    assert_eq!(table.current().player_id, PlayerId::from("b"));
}

#[test]
fn test_host_forfeits_turn_of_disconnected_player() {
    let mut table = two_players(Board::linear("Plain", 10));
    let mut next = table.state.clone();
    next.player_mut(&PlayerId::from("a")).unwrap().state = PlayerState::Disconnected;
    table.commit(next);
    table.settle();

    assert_eq!(table.player("a").turns_taken, 1);
    assert_eq!(table.current().player_id, PlayerId::from("b"));
    assert_eq!(table.state.turn_phase, TurnPhase::WaitingForMove);
}

#[test]
fn test_roll_modifier_is_applied_and_clamped() {
    let mut table = two_players(Board::linear("Plain", 10));
    let mut next = table.state.clone();
    next.player_mut(&PlayerId::from("a"))
        .unwrap()
        .effects
        .push(PlayerEffect::RollModifier {
            bonus: -10,
            remaining_rolls: 1,
        });
    table.commit(next);
    table.settle();

    table.input("peer-a", |e| e.roll_value(3));
    assert!(table.outputs.contains(&EngineOutput::Rolled {
        player_id: PlayerId::from("a"),
        roll: 3,
        moves: 0
    }));
    assert_eq!(table.player("a").current_space_id, Some(SpaceId(0)));
    assert!(table.player("a").effects.is_empty());
}

#[test]
fn test_finishing_every_player_ends_the_game() {
    let finish = GameEvent::new(Trigger::OnLand, Action::FinishGame);
    let board = Board::new(
        "Sprint",
        0,
        vec![
            Space::new(0, "start").connect_to(1),
            Space::new(1, "goal").with_event(finish),
        ],
    );
    let mut table = Table::start(board, &[("solo", "peer-a")]);
    table.input("peer-a", |e| e.roll_value(1));

    assert_eq!(table.state.game_phase, GamePhase::GameEnded);
    assert_eq!(table.player("solo").state, PlayerState::CompletedGame);
    assert!(table.outputs.contains(&EngineOutput::GameEnded));
}

#[test]
fn test_replicated_roll_is_deterministic() {
    let mut a = two_players(Board::linear("Plain", 40));
    let mut b = two_players(Board::linear("Plain", 40));
    a.input("peer-a", |e| e.roll());
    b.input("peer-a", |e| e.roll());
    assert_eq!(
        a.player("a").current_space_id,
        b.player("a").current_space_id
    );
}

#[test]
fn test_step_is_proposed_again_when_a_newer_state_supersedes_it() {
    let mut table = two_players(Board::linear("Plain", 10));
    let outputs = table.engine("peer-a").roll_value(4).unwrap();
    let EngineOutput::Propose(rolled) = outputs[1].clone() else {
        panic!("roll should propose");
    };
    table.commit(rolled);

    let state = table.state.clone();
    let first = table.engine("peer-a").update(state.clone()).unwrap();
    assert!(matches!(first.as_slice(), [EngineOutput::Propose(_)]));

    // A rename is committed before that proposal reaches the host, so the
    // host drops it. The turn itself has not moved.
    let mut renamed = state;
    renamed.players[1].nickname = "Rex".into();
    renamed.bump_version(1);
    let retry = table.engine("peer-a").update(renamed.clone()).unwrap();
    let [EngineOutput::Propose(next)] = retry.as_slice() else {
        panic!("the step should be proposed again, got {retry:?}");
    };
    assert_eq!(next.version, renamed.version);
    assert_eq!(next.turn_phase, TurnPhase::ProcessingMove);

    // Receiving that same state again is not a reason to propose twice.
    assert!(table.engine("peer-a").update(renamed).unwrap().is_empty());
}

#[test]
fn test_unrelated_change_after_accepted_step_does_not_repeat_it() {
    let mut table = two_players(Board::linear("Plain", 10));
    table.input("peer-a", |e| e.roll_value(2));
    let before = table.history.len();

    // Bob is waiting for his roll; Ann's engine holds no outstanding
    // proposal, so a rename changes nothing for either engine.
    let mut renamed = table.state.clone();
    renamed.players[0].nickname = "Annie".into();
    renamed.bump_version(1);
    table.state = renamed;
    table.settle();
    assert_eq!(table.history.len(), before);
}
