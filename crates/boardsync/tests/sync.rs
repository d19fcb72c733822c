//! Host and clients wired together in-process, without a runtime.
//!
//! `Table` plays the network: it delivers every queued host message to
//! the addressed clients and every client message to the host until
//! nothing moves any more.

use std::collections::HashSet;

use boardsync::prelude::*;
use boardsync::Outbound;
use boardsync_protocol::MessageType;
use serde_json::json;

struct Table {
    host: HostCore,
    clients: Vec<(PeerId, ClientCore)>,
    closed: HashSet<PeerId>,
    deliveries: Vec<(PeerId, MessageType)>,
    /// `(version, turn phase, remaining moves)` after each accepted step.
    history: Vec<(u64, TurnPhase, u32)>,
}

impl Table {
    fn new(settings: GameSettings) -> Self {
        let host = HostCore::new(
            HostConfig::default(),
            EngineRegistry::with_defaults(),
            Board::linear("Track", 30),
            settings,
            GameRng::seed_from_u64(11),
        )
        .unwrap();
        Self {
            host,
            clients: Vec::new(),
            closed: HashSet::new(),
            deliveries: Vec::new(),
            history: Vec::new(),
        }
    }

    fn join(&mut self, peer: &str, nicknames: &[&str]) -> usize {
        let drafts = nicknames.iter().map(|n| PlayerDraft::new(*n)).collect();
        let client = ClientCore::new(ClientConfig::default(), EngineRegistry::with_defaults(), drafts).unwrap();
        let peer_id = PeerId::from(peer);
        self.host.connect(peer_id.clone()).unwrap();
        self.clients.push((peer_id, client));
        self.pump();
        self.clients.len() - 1
    }

    /// The client at `index` lost its link and comes back on a new one.
    fn reconnect(&mut self, index: usize, new_peer: &str) {
        let peer_id = PeerId::from(new_peer);
        self.clients[index].0 = peer_id.clone();
        self.host.connect(peer_id).unwrap();
        self.pump();
    }

    fn client(&mut self, index: usize) -> &mut ClientCore {
        &mut self.clients[index].1
    }

    fn pump(&mut self) {
        for _ in 0..10_000 {
            let from_host = self.deliver_from_host();
            let from_clients = (0..self.clients.len()).fold(false, |moved, i| self.deliver_from_client(i) || moved);
            if !from_host && !from_clients {
                return;
            }
        }
        panic!("table did not settle");
    }

    /// Hands everything the host queued to the addressed clients.
    fn deliver_from_host(&mut self) -> bool {
        let outbound = self.host.take_outbound();
        let moved = !outbound.is_empty();
        for outbound in outbound {
            match outbound {
                Outbound::Send { to, message } => {
                    let raw = message.to_value().unwrap();
                    for (peer_id, client) in &mut self.clients {
                        if to.includes(peer_id) && !self.closed.contains(peer_id) {
                            self.deliveries.push((peer_id.clone(), message.message_type()));
                            client.handle_message(raw.clone());
                        }
                    }
                }
                Outbound::Close(peer_id) => {
                    self.closed.insert(peer_id);
                }
            }
        }
        moved
    }

    /// Hands everything one client queued to the host.
    fn deliver_from_client(&mut self, index: usize) -> bool {
        let (peer_id, client) = &mut self.clients[index];
        let messages = client.take_outbound();
        if self.closed.contains(peer_id) || messages.is_empty() {
            return false;
        }
        let peer_id = peer_id.clone();
        for message in messages {
            let before = self.host.state().version;
            self.host.handle_message(&peer_id, message.to_value().unwrap());
            let state = self.host.state();
            if state.version != before {
                self.history.push((state.version, state.turn_phase, state.remaining_moves));
            }
        }
        true
    }

    fn assert_converged(&self) {
        let host = self.host.state().to_json().unwrap();
        for (peer_id, client) in &self.clients {
            if self.closed.contains(peer_id) {
                continue;
            }
            let mirror = client.state().unwrap().to_json().unwrap();
            assert_eq!(mirror, host, "{peer_id} diverged");
        }
    }
}

fn two_player_table() -> Table {
    let mut table = Table::new(GameSettings {
        player_limit: 2,
        max_players_per_peer: 1,
        ..GameSettings::default()
    });
    table.join("a", &["Ann"]);
    table.join("b", &["Bob"]);
    table
}

#[test]
fn test_lobby_to_roll_cycle() {
    let mut table = two_player_table();
    assert_eq!(table.host.state().players.len(), 2);

    table.host.start_game().unwrap();
    table.pump();

    let state = table.host.state();
    assert_eq!(state.game_phase, GamePhase::InGame);
    assert_eq!(state.turn_phase, TurnPhase::WaitingForMove);
    assert_eq!(state.current_player().unwrap().nickname, "Ann");
    assert!(table.deliveries.iter().any(|(_, t)| *t == MessageType::StartGame));

    table.client(0).roll_value(4).unwrap();
    let proposal = table
        .client(0)
        .take_outbound()
        .into_iter()
        .find_map(|m| match m {
            Message::ProposeGameState { game_state } => Some(game_state),
            _ => None,
        })
        .unwrap();
    assert_eq!(proposal["remainingMoves"], 4);
    assert_eq!(proposal["turnPhase"], "PROCESSING_EVENTS");

    table.history.clear();
    table
        .host
        .handle_message(&PeerId::from("a"), json!({ "type": "PROPOSE_GAME_STATE", "gameState": proposal }));
    table.pump();

    assert_eq!(table.history[0].1, TurnPhase::ProcessingMove);
    assert_eq!(table.history[0].2, 4);
    // An event-free board goes straight from events to moves each step.
    assert!(!table.history.iter().any(|(_, phase, _)| *phase == TurnPhase::ProcessingEvent));

    let state = table.host.state();
    let ann = &state.players[0];
    assert_eq!(ann.current_space_id, Some(SpaceId(4)));
    assert_eq!(ann.turns_taken, 1);
    assert_eq!(state.current_player().unwrap().nickname, "Bob");
    assert_eq!(state.turn_phase, TurnPhase::WaitingForMove);
    table.assert_converged();
}

#[test]
fn test_versions_step_by_one() {
    let mut table = two_player_table();
    table.host.start_game().unwrap();
    table.pump();
    table.client(0).roll_value(3).unwrap();
    table.pump();

    let versions: Vec<u64> = table.history.iter().map(|(v, _, _)| *v).collect();
    assert!(versions.windows(2).all(|w| w[1] > w[0]));

    let seen: Vec<u64> = table
        .client(1)
        .take_events()
        .into_iter()
        .filter_map(|e| match e {
            ClientEvent::StateUpdated { version } => Some(version),
            _ => None,
        })
        .collect();
    // Bob saw every version from his join onwards, each exactly once.
    assert!(seen.windows(2).skip(1).all(|w| w[1] == w[0] + 1), "{seen:?}");
    assert_eq!(seen.last().copied(), Some(table.host.state().version));
}

#[test]
fn test_delta_for_small_change_on_large_table() {
    let mut table = Table::new(GameSettings {
        player_limit: 50,
        max_players_per_peer: 5,
        ..GameSettings::default()
    });
    for p in 0..10 {
        let names: Vec<String> = (0..5).map(|i| format!("Player {p}-{i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        table.join(&format!("peer-{p}"), &names);
    }
    assert_eq!(table.host.state().players.len(), 50);

    let player_id = table.host.state().players[7].player_id.clone();
    let owner = table.host.state().players[7].peer_id.clone();
    let index = table.clients.iter().position(|(p, _)| *p == owner).unwrap();

    table.deliveries.clear();
    table.client(index).change_name(&player_id, "Zed");
    table.pump();

    assert_eq!(table.host.state().player(&player_id).unwrap().nickname, "Zed");
    let state_messages: Vec<MessageType> = table
        .deliveries
        .iter()
        .map(|(_, t)| *t)
        .filter(|t| matches!(t, MessageType::GameState | MessageType::GameStateDelta))
        .collect();
    assert_eq!(state_messages.len(), 10);
    assert!(state_messages.iter().all(|t| *t == MessageType::GameStateDelta));
    table.assert_converged();
}

#[test]
fn test_rejected_proposal_resyncs_only_the_proposer() {
    let mut table = two_player_table();
    table.host.start_game().unwrap();
    table.pump();
    let version = table.host.state().version;

    // Bob is not acting; he tries to move his own piece.
    let mut forged = table.client(1).state().unwrap().clone();
    forged.players[1].current_space_id = Some(SpaceId(20));
    table.deliveries.clear();
    table.host.handle_message(
        &PeerId::from("b"),
        json!({ "type": "PROPOSE_GAME_STATE", "gameState": forged.to_json().unwrap() }),
    );
    table.pump();

    assert_eq!(table.host.state().version, version);
    assert_eq!(table.deliveries, vec![(PeerId::from("b"), MessageType::GameState)]);
    table.assert_converged();
}

#[test]
fn test_stale_proposal_is_rejected() {
    let mut table = two_player_table();
    table.host.start_game().unwrap();
    table.pump();

    let mut stale = table.client(0).state().unwrap().clone();
    stale.version -= 1;
    stale.remaining_moves = 6;
    stale.turn_phase = TurnPhase::ProcessingEvents;
    let version = table.host.state().version;
    table.host.handle_message(
        &PeerId::from("a"),
        json!({ "type": "PROPOSE_GAME_STATE", "gameState": stale.to_json().unwrap() }),
    );
    table.pump();
    assert_eq!(table.host.state().version, version);
    assert_eq!(table.host.state().turn_phase, TurnPhase::WaitingForMove);
}

#[test]
fn test_disconnected_turn_is_forfeited_and_player_reclaimed() {
    let mut table = two_player_table();
    table.host.start_game().unwrap();
    table.pump();

    // Ann's link drops while it is her turn.
    table.closed.insert(PeerId::from("a"));
    table.host.disconnect(&PeerId::from("a")).unwrap();
    table.pump();

    let state = table.host.state();
    assert_eq!(state.players[0].state, PlayerState::Disconnected);
    assert_eq!(state.players[0].turns_taken, 1);
    assert_eq!(state.current_player().unwrap().nickname, "Bob");
    assert_eq!(state.turn_phase, TurnPhase::WaitingForMove);

    table.reconnect(0, "a2");
    let state = table.host.state();
    let ann = &state.players[0];
    assert_eq!(ann.state, PlayerState::Active);
    assert_eq!(ann.peer_id, PeerId::from("a2"));
    assert_eq!(state.players.len(), 2);
    assert_eq!(state.current_player().unwrap().nickname, "Bob");
    table.assert_converged();
}

#[test]
fn test_late_join_is_rejected_in_game() {
    let mut table = Table::new(GameSettings::default());
    table.join("a", &["Ann"]);
    table.host.start_game().unwrap();
    table.pump();

    let late = table.join("c", &["Cat"]);
    assert_eq!(table.host.state().players.len(), 1);
    let events = table.client(late).take_events();
    assert!(events.iter().any(|e| matches!(e, ClientEvent::JoinRejected { .. })));
}

#[test]
fn test_kick_removes_players_and_closes_link() {
    let mut table = two_player_table();
    table.host.kick(&PeerId::from("b"), Some("bye".into())).unwrap();
    table.pump();

    assert!(table.closed.contains(&PeerId::from("b")));
    assert_eq!(table.host.state().players.len(), 1);
    assert!(table.client(1).is_kicked());
    table.assert_converged();
}

#[test]
fn test_pause_blocks_turn_inputs() {
    let mut table = two_player_table();
    table.host.start_game().unwrap();
    table.pump();

    table.host.pause().unwrap();
    table.pump();
    assert!(table.client(0).roll_value(2).is_err());

    table.host.resume().unwrap();
    table.pump();
    table.client(0).roll_value(2).unwrap();
    table.pump();
    assert_eq!(table.host.state().players[0].current_space_id, Some(SpaceId(2)));
}

#[test]
fn test_add_player_in_lobby_then_rejected_after_start() {
    let mut table = Table::new(GameSettings::default());
    table.join("a", &["Ann"]);
    table.client(0).add_player(PlayerDraft::new("Ann's kid")).unwrap();
    table.pump();
    assert_eq!(table.host.state().players.len(), 2);

    table.host.start_game().unwrap();
    table.pump();
    table.client(0).add_player(PlayerDraft::new("Too late")).unwrap();
    table.pump();
    assert_eq!(table.host.state().players.len(), 2);
    let events = table.client(0).take_events();
    assert!(events.iter().any(|e| matches!(e, ClientEvent::AddPlayerRejected { .. })));
}

#[test]
fn test_rename_racing_an_automatic_step_does_not_stall_the_turn() {
    let mut table = two_player_table();
    table.host.start_game().unwrap();
    table.pump();

    // Ann's roll is committed and broadcast. Her engine immediately
    // proposes the next step, but that proposal is still in flight.
    table.client(0).roll_value(4).unwrap();
    table.deliver_from_client(0);
    table.deliver_from_host();
    assert_eq!(table.host.state().turn_phase, TurnPhase::ProcessingEvents);

    // Bob's rename gets to the host first, so Ann's proposal is stale.
    let bob = table.host.state().players[1].player_id.clone();
    table.client(1).change_name(&bob, "Rex");
    table.deliver_from_client(1);
    table.pump();

    let state = table.host.state();
    assert_eq!(state.player(&bob).unwrap().nickname, "Rex");
    assert_eq!(state.players[0].current_space_id, Some(SpaceId(4)));
    assert_eq!(state.players[0].turns_taken, 1);
    assert_eq!(state.current_player().unwrap().nickname, "Rex");
    assert_eq!(state.turn_phase, TurnPhase::WaitingForMove);
    table.assert_converged();
}

#[test]
fn test_roll_rejected_as_stale_can_be_rolled_again() {
    let mut table = two_player_table();
    table.host.start_game().unwrap();
    table.pump();
    table.client(0).take_events();

    // Ann rolls, but Bob's rename is committed before her roll arrives.
    table.client(0).roll_value(3).unwrap();
    let bob = table.host.state().players[1].player_id.clone();
    table.client(1).change_name(&bob, "Rex");
    table.deliver_from_client(1);
    table.deliver_from_client(0);
    table.deliver_from_host();

    // The roll was dropped; Ann is back to waiting with the fresh state.
    assert_eq!(table.host.state().turn_phase, TurnPhase::WaitingForMove);
    assert_eq!(table.host.state().players[0].turns_taken, 0);
    let events = table.client(0).take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, ClientEvent::Engine(EngineOutput::AwaitingRoll { .. }))));

    table.client(0).roll_value(3).unwrap();
    table.pump();
    let state = table.host.state();
    assert_eq!(state.players[0].current_space_id, Some(SpaceId(3)));
    assert_eq!(state.current_player().unwrap().nickname, "Rex");
    table.assert_converged();
}
