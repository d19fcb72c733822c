//! The authoritative host.
//!
//! [`HostCore`] is a plain state machine: it never touches the network.
//! Feed it connection events and raw messages, then drain the
//! [`Outbound`] queue and deliver what it says. The server runner in
//! [`crate::server`] does exactly that from a single Tokio task.
//!
//! ```text
//!  PROPOSE_GAME_STATE ─→ validate ─┬─ ok ──→ commit ─→ broadcast (delta or full)
//!                                  │            ↑  │
//!                                  │            └──┘ host engine proposals
//!                                  └─ rejected ─→ full state to the proposer only
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use boardsync_engine::{EngineContext, EngineInput, EngineOutput, EngineRegistry, GameEngine};
use boardsync_protocol::{
    Flow, HandlerError, HandlerOptions, Message, MessageType, NetworkProtocol, PeerId, Recipient,
};
use boardsync_session::{PeerSessions, SessionConfig};
use boardsync_state::delta::DEFAULT_DELTA_THRESHOLD;
use boardsync_state::{
    Board, GamePhase, GameRng, GameSettings, GameState, PlayerDraft, PlayerId, PlayerState,
    SaveFile, StateDelta, TurnPhase, should_use_delta, validate_color, validate_nickname,
};
use serde_json::Value;
use tokio::time::Instant;

use crate::{BoardsyncError, now_ms};

/// Upper bound on host engine steps committed for one mutation.
const MAX_SETTLE_STEPS: usize = 1_000;

/// Piece colors handed out when a player does not pick one.
const PALETTE: [&str; 8] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
];

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// A delta is sent only if it is smaller than this share of the
    /// full state.
    pub delta_threshold: f64,
    /// Peer silence timeout and how long closed sessions linger.
    pub session: SessionConfig,
    /// How often the host sends `HEARTBEAT` to every peer.
    pub heartbeat_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            delta_threshold: DEFAULT_DELTA_THRESHOLD,
            session: SessionConfig::default(),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Something the host wants delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Send { to: Recipient, message: Message },
    /// Close this peer's connection after flushing what was queued before.
    Close(PeerId),
}

#[derive(Debug, Clone)]
enum PlayerEdit {
    Nickname(String),
    Color(String),
    PeerColor(String),
}

/// Everything the message handlers work on.
pub struct HostContext {
    config: HostConfig,
    registry: EngineRegistry,
    engine: Box<dyn GameEngine>,
    state: GameState,
    /// Serialized form of the last broadcast version; the base for the
    /// next delta.
    last_broadcast: Value,
    sessions: PeerSessions,
    needs_full: HashSet<PeerId>,
    /// Player state before a disconnect, restored on reclaim.
    parked: HashMap<PlayerId, PlayerState>,
    outbox: Vec<Outbound>,
    notifications: Vec<EngineOutput>,
    last_heartbeat: u64,
}

impl HostContext {
    fn send(&mut self, to: Recipient, message: Message) {
        if to == Recipient::Peer(PeerId::host()) {
            return;
        }
        self.outbox.push(Outbound::Send { to, message });
    }

    fn resend_full(&mut self, peer_id: &PeerId) {
        let game_state = self.last_broadcast.clone();
        self.send(Recipient::Peer(peer_id.clone()), Message::GameState { game_state });
    }

    /// Strictly increasing so clients can tell a fresh heartbeat from a
    /// replayed one even within the same millisecond.
    fn next_heartbeat_timestamp(&mut self) -> u64 {
        self.last_heartbeat = now_ms().max(self.last_heartbeat + 1);
        self.last_heartbeat
    }

    /// Makes `next` authoritative, broadcasts it, then lets the host
    /// engine take any steps it is responsible for.
    fn commit(&mut self, next: GameState) -> Result<(), BoardsyncError> {
        let mut pending = Some(next);
        let mut steps = 0;
        while let Some(mut next) = pending.take() {
            steps += 1;
            if steps > MAX_SETTLE_STEPS {
                tracing::warn!(version = self.state.version, "host engine did not settle");
                break;
            }

            next.version = self.state.version;
            next.bump_version(now_ms());
            self.state = next;
            self.broadcast()?;

            let outputs = match self.engine.update(self.state.clone()) {
                Ok(outputs) => outputs,
                Err(error) => {
                    tracing::warn!(%error, version = self.state.version, "host engine step failed");
                    continue;
                }
            };
            for output in outputs {
                match output {
                    EngineOutput::Propose(proposal) => pending = Some(proposal),
                    other => self.notifications.push(other),
                }
            }
        }
        Ok(())
    }

    fn broadcast(&mut self) -> Result<(), BoardsyncError> {
        let full = self.state.to_json()?;
        let delta = StateDelta::between(&self.last_broadcast, &full)?.to_value()?;
        let full_bytes = serde_json::to_vec(&full)?.len();
        let delta_bytes = serde_json::to_vec(&delta)?.len();
        let use_delta = should_use_delta(delta_bytes, full_bytes, self.config.delta_threshold);

        let peers = self.sessions.connected_peers();
        let (fresh, rest): (Vec<PeerId>, Vec<PeerId>) =
            peers.into_iter().partition(|peer| self.needs_full.contains(peer));

        tracing::debug!(
            version = self.state.version,
            full_bytes,
            delta_bytes,
            use_delta,
            fresh = fresh.len(),
            "broadcasting state"
        );

        if !use_delta {
            self.send(Recipient::All, Message::GameState { game_state: full.clone() });
        } else {
            for peer in &fresh {
                self.send(Recipient::Peer(peer.clone()), Message::GameState { game_state: full.clone() });
            }
            if fresh.is_empty() {
                self.send(Recipient::All, Message::GameStateDelta { delta });
            } else {
                for peer in rest {
                    self.send(Recipient::Peer(peer), Message::GameStateDelta { delta: delta.clone() });
                }
            }
        }

        self.needs_full.clear();
        self.last_broadcast = full;
        Ok(())
    }

    /// Disconnected players keep their seat in a running game; in the
    /// lobby they are simply dropped.
    fn release_players(&mut self, peer_id: &PeerId) -> Result<(), BoardsyncError> {
        self.needs_full.remove(peer_id);
        let owned: Vec<PlayerId> = self
            .state
            .players_of_peer(peer_id)
            .map(|p| p.player_id.clone())
            .collect();
        if owned.is_empty() {
            return Ok(());
        }

        let next = if self.state.game_phase == GamePhase::InLobby {
            self.without_players(&owned)
        } else {
            let mut next = self.state.clone();
            for player in next.players.iter_mut().filter(|p| owned.contains(&p.player_id)) {
                if player.state != PlayerState::Disconnected {
                    self.parked.insert(player.player_id.clone(), player.state);
                    player.state = PlayerState::Disconnected;
                }
            }
            next
        };
        tracing::info!(%peer_id, players = owned.len(), "releasing players of departed peer");
        self.commit(next)
    }

    /// A copy of the state without `ids`. If that changes whose turn it
    /// is, the turn starts over.
    fn without_players(&self, ids: &[PlayerId]) -> GameState {
        let mut next = self.state.clone();
        let current_before = next.current_player().map(|p| p.player_id.clone());
        next.players.retain(|p| !ids.contains(&p.player_id));
        let current_after = next.current_player().map(|p| p.player_id.clone());
        if next.game_phase != GamePhase::InLobby && current_before != current_after {
            next.board.reset_events();
            next.remaining_moves = 0;
            next.moves_taken_this_turn = 0;
            next.turn_phase = TurnPhase::ChangeTurn;
        }
        next
    }

    fn admit(&self, from: &PeerId, claimed: &PeerId, players: &[Value]) -> Result<GameState, String> {
        if claimed != from {
            return Err(format!("peer id {claimed} does not match connection {from}"));
        }
        let settings = &self.state.settings;
        if players.is_empty() || players.len() > settings.max_players_per_peer {
            return Err(format!(
                "a peer joins with 1 to {} players, got {}",
                settings.max_players_per_peer,
                players.len()
            ));
        }
        let drafts = players
            .iter()
            .cloned()
            .map(PlayerDraft::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;

        let mut next = self.state.clone();
        if next.game_phase == GamePhase::InLobby {
            let owned = next.players_of_peer(from).count();
            if owned + drafts.len() > settings.max_players_per_peer {
                return Err(format!(
                    "a peer may control at most {} players",
                    settings.max_players_per_peer
                ));
            }
            if next.players.len() + drafts.len() > settings.player_limit {
                return Err(format!("game is full ({} players)", settings.player_limit));
            }
            for draft in drafts {
                push_player(&mut next, from, draft)?;
            }
            return Ok(next);
        }

        for draft in &drafts {
            let Some(id) = draft.player_id.as_deref() else {
                return Err("game in progress: only disconnected players can be reclaimed".into());
            };
            let player_id = PlayerId::from(id);
            let restored = self
                .parked
                .get(&player_id)
                .copied()
                .unwrap_or(PlayerState::Active);
            let player = next
                .player_mut(&player_id)
                .ok_or_else(|| format!("no player {id} to reclaim"))?;
            if player.state != PlayerState::Disconnected {
                return Err(format!("player {id} is not disconnected"));
            }
            player.peer_id = from.clone();
            player.state = restored;
        }
        Ok(next)
    }

    fn with_added_player(&self, owner: &PeerId, player: Value) -> Result<GameState, String> {
        if self.state.game_phase != GamePhase::InLobby {
            return Err("players can only be added in the lobby".into());
        }
        let draft = PlayerDraft::from_value(player).map_err(|e| e.to_string())?;
        let settings = &self.state.settings;
        if self.state.players.len() >= settings.player_limit {
            return Err(format!("game is full ({} players)", settings.player_limit));
        }
        if self.state.players_of_peer(owner).count() >= settings.max_players_per_peer {
            return Err(format!(
                "a peer may control at most {} players",
                settings.max_players_per_peer
            ));
        }
        let mut next = self.state.clone();
        push_player(&mut next, owner, draft)?;
        Ok(next)
    }

    fn check_owner(&self, from: &PeerId, player_id: &PlayerId) -> Result<(), String> {
        let player = self
            .state
            .player(player_id)
            .ok_or_else(|| format!("no player {player_id}"))?;
        if &player.peer_id != from && *from != PeerId::host() {
            return Err(format!("{from} does not own {player_id}"));
        }
        Ok(())
    }

    fn with_edit(&self, from: &PeerId, player_id: &PlayerId, edit: PlayerEdit) -> Result<GameState, String> {
        let settings = &self.state.settings;
        let allowed = match edit {
            PlayerEdit::Nickname(_) => settings.allow_name_change,
            PlayerEdit::Color(_) => settings.allow_color_change,
            PlayerEdit::PeerColor(_) => settings.allow_peer_color_change,
        };
        if !allowed {
            return Err("this change is disabled in the game settings".into());
        }
        self.check_owner(from, player_id)?;

        let mut next = self.state.clone();
        match edit {
            PlayerEdit::Nickname(raw) => {
                let nickname = validate_nickname(&raw).map_err(|e| e.to_string())?.to_string();
                if let Some(player) = next.player_mut(player_id) {
                    player.nickname = nickname;
                }
            }
            PlayerEdit::Color(color) => {
                validate_color(&color).map_err(|e| e.to_string())?;
                if let Some(player) = next.player_mut(player_id) {
                    player.player_color = color;
                }
            }
            PlayerEdit::PeerColor(color) => {
                validate_color(&color).map_err(|e| e.to_string())?;
                let owner = self
                    .state
                    .player(player_id)
                    .map(|p| p.peer_id.clone())
                    .ok_or_else(|| format!("no player {player_id}"))?;
                for player in next.players.iter_mut().filter(|p| p.peer_id == owner) {
                    player.peer_color = color.clone();
                }
            }
        }
        Ok(next)
    }

    fn check_proposal(&self, from: &PeerId, proposal: &GameState) -> Result<(), &'static str> {
        let current = &self.state;
        if proposal.version != current.version {
            return Err("stale version");
        }
        if current.game_phase == GamePhase::Paused && proposal.game_phase != GamePhase::Paused {
            return Err("only the host resumes a paused game");
        }
        let phase_ok = proposal.game_phase == current.game_phase
            || (current.game_phase == GamePhase::InGame && proposal.game_phase == GamePhase::GameEnded);
        if !phase_ok {
            return Err("game phase change not allowed");
        }
        if self.engine.acting_peer(current).as_ref() != Some(from) {
            return Err("not acting for the current turn");
        }
        if roster(proposal) != roster(current) {
            return Err("player set changed");
        }
        if proposal.settings != current.settings {
            return Err("settings are host-only");
        }
        Ok(())
    }

    /// Applies an edit or tells the sender what the truth is.
    fn commit_or_correct(&mut self, from: &PeerId, result: Result<GameState, String>) -> Result<(), BoardsyncError> {
        match result {
            Ok(next) => self.commit(next),
            Err(reason) => {
                tracing::warn!(%from, %reason, "player edit refused");
                self.resend_full(from);
                Ok(())
            }
        }
    }
}

/// Adds a player built from `draft` to `next`.
fn push_player(next: &mut GameState, owner: &PeerId, draft: PlayerDraft) -> Result<(), String> {
    if let Some(id) = &draft.player_id {
        if next.player(&PlayerId::from(id.as_str())).is_some() {
            return Err(format!("player id {id} is already taken"));
        }
    }
    let color = PALETTE[next.players.len() % PALETTE.len()];
    let mut player = draft
        .into_player(owner.clone(), color)
        .map_err(|e| e.to_string())?;
    if next.game_phase != GamePhase::InLobby {
        player.current_space_id = Some(next.board.start_space_id);
    }
    next.players.push(player);
    Ok(())
}

/// Who owns which seat. Proposals may not change it.
fn roster(state: &GameState) -> Vec<(&PlayerId, &PeerId)> {
    state.players.iter().map(|p| (&p.player_id, &p.peer_id)).collect()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `JOIN`: admits the peer's players, or reclaims disconnected seats
/// once the game is running.
///
/// On success the joiner is flagged for a full state, since it has no
/// base to apply a delta to, and the new state is committed. Parked
/// players that were just reclaimed are forgotten. On failure only the
/// joiner hears about it, through `JOIN_REJECTED`.
fn on_join(host: &mut HostContext, from: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let Message::Join { peer_id, players } = message else {
        return Ok(());
    };
    match host.admit(from, peer_id, players) {
        Ok(next) => {
            tracing::info!(%from, players = players.len(), "join accepted");
            host.needs_full.insert(from.clone());
            host.parked.retain(|id, _| {
                next.player(id)
                    .is_some_and(|p| p.state == PlayerState::Disconnected)
            });
            host.commit(next)?;
        }
        Err(reason) => {
            tracing::warn!(%from, %reason, "join rejected");
            host.send(Recipient::Peer(from.clone()), Message::JoinRejected { reason });
        }
    }
    Ok(())
}

/// `PROPOSE_GAME_STATE`: the acting peer's engine suggests the next step.
///
/// A proposal must be built on the current version and may only touch
/// what a turn is allowed to touch (see [`HostContext::check_proposal`]).
/// Anything else is answered with the full authoritative state, which
/// is how a client learns its proposal lost a race. A proposal equal to
/// the current state is ignored.
fn on_propose(host: &mut HostContext, from: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let Message::ProposeGameState { game_state } = message else {
        return Ok(());
    };
    let proposal = GameState::from_json(game_state.clone())?;

    if let Err(reason) = host.check_proposal(from, &proposal) {
        // No rejection message: the proposer just gets the truth back.
        tracing::warn!(%from, reason, version = proposal.version, "proposal rejected");
        host.resend_full(from);
        return Ok(());
    }
    if proposal.same_content(&host.state) {
        tracing::debug!(%from, "proposal changes nothing");
        return Ok(());
    }
    tracing::debug!(%from, turn_phase = %proposal.turn_phase, "proposal accepted");
    host.commit(proposal)?;
    Ok(())
}

/// `REQUEST_FULL_STATE`: a client lost track, e.g. after a version gap.
fn on_request_full_state(host: &mut HostContext, from: &PeerId, message: &Message) -> Result<(), HandlerError> {
    if let Message::RequestFullState { reason } = message {
        tracing::info!(%from, reason = reason.as_deref().unwrap_or("unspecified"), "full state requested");
    }
    host.resend_full(from);
    Ok(())
}

/// `PROPOSE_ADD_PLAYER`: one more local player on an admitted peer.
/// Refusals echo the player back so the client can show which one.
fn on_add_player(host: &mut HostContext, from: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let Message::ProposeAddPlayer { player } = message else {
        return Ok(());
    };
    match host.with_added_player(from, player.clone()) {
        Ok(next) => host.commit(next)?,
        Err(reason) => {
            tracing::warn!(%from, %reason, "add player rejected");
            host.send(
                Recipient::Peer(from.clone()),
                Message::AddPlayerRejected {
                    reason,
                    player: Some(player.clone()),
                },
            );
        }
    }
    Ok(())
}

/// Name, color and peer color changes. The sender must own the player;
/// otherwise it gets the current state back.
fn on_player_edit(host: &mut HostContext, from: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let (player_id, edit) = match message {
        Message::NameChange { player_id, nickname } => (player_id, PlayerEdit::Nickname(nickname.clone())),
        Message::ColorChange { player_id, player_color } => (player_id, PlayerEdit::Color(player_color.clone())),
        Message::PeerColorChange { player_id, peer_color } => {
            (player_id, PlayerEdit::PeerColor(peer_color.clone()))
        }
        _ => return Ok(()),
    };
    let result = host.with_edit(from, &PlayerId::from(player_id.as_str()), edit);
    host.commit_or_correct(from, result)?;
    Ok(())
}

fn on_remove_player(host: &mut HostContext, from: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let Message::RemovePlayer { player_id } = message else {
        return Ok(());
    };
    let player_id = PlayerId::from(player_id.as_str());
    let result = host
        .check_owner(from, &player_id)
        .map(|()| host.without_players(std::slice::from_ref(&player_id)));
    if result.is_ok() {
        host.parked.remove(&player_id);
    }
    host.commit_or_correct(from, result)?;
    Ok(())
}

/// Echoes the timestamp so the peer can measure round trips.
fn on_heartbeat(host: &mut HostContext, from: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let Message::Heartbeat { timestamp } = message else {
        return Ok(());
    };
    host.sessions.record_heartbeat(from, *timestamp, Instant::now())?;
    host.send(
        Recipient::Peer(from.clone()),
        Message::HeartbeatAck { timestamp: *timestamp },
    );
    Ok(())
}

/// Wires every client message type to its handler.
///
/// A single middleware runs first: messages from peers without a live
/// session are dropped, and any other traffic refreshes the sender's
/// liveness.
fn build_router() -> NetworkProtocol<HostContext> {
    let mut router = NetworkProtocol::new();

    router.use_middleware(|host: &mut HostContext, from: &PeerId, message: &Message| {
        if *from == PeerId::host() {
            return Flow::Next;
        }
        if !host.sessions.is_connected(from) {
            tracing::debug!(%from, message_type = %message.message_type(), "dropping message from inactive peer");
            return Flow::Halt;
        }
        // Any traffic proves the peer is alive.
        if let Err(error) = host.sessions.touch(from, Instant::now()) {
            tracing::debug!(%from, %error, "could not refresh peer liveness");
        }
        Flow::Next
    });

    router.register_handler(MessageType::Join, HandlerOptions::new(0, "admit players"), on_join);
    router.register_handler(
        MessageType::ProposeGameState,
        HandlerOptions::new(0, "validate and commit proposals"),
        on_propose,
    );
    router.register_handler(
        MessageType::RequestFullState,
        HandlerOptions::new(0, "resync a peer"),
        on_request_full_state,
    );
    router.register_handler(
        MessageType::ProposeAddPlayer,
        HandlerOptions::new(0, "add a lobby player"),
        on_add_player,
    );
    for message_type in [
        MessageType::NameChange,
        MessageType::ColorChange,
        MessageType::PeerColorChange,
    ] {
        router.register_handler(message_type, HandlerOptions::new(0, "edit a player"), on_player_edit);
    }
    router.register_handler(
        MessageType::RemovePlayer,
        HandlerOptions::new(0, "remove a player"),
        on_remove_player,
    );
    router.register_handler(MessageType::Heartbeat, HandlerOptions::new(10, "answer heartbeat"), on_heartbeat);
    router.register_handler(
        MessageType::HeartbeatAck,
        HandlerOptions::new(10, "liveness only"),
        |_: &mut HostContext, _: &PeerId, _: &Message| Ok(()),
    );
    router
}

// ---------------------------------------------------------------------------
// HostCore
// ---------------------------------------------------------------------------

/// The host's side of a game: authoritative state, peers, and routing.
pub struct HostCore {
    router: NetworkProtocol<HostContext>,
    ctx: HostContext,
}

impl HostCore {
    /// Creates a host with an empty lobby.
    pub fn new(
        config: HostConfig,
        registry: EngineRegistry,
        board: Board,
        settings: GameSettings,
        rng: GameRng,
    ) -> Result<Self, BoardsyncError> {
        let state = GameState::new(board, settings, rng)?;
        Self::with_state(config, registry, state)
    }

    /// Creates a host that continues a saved game. Every saved player
    /// starts out disconnected until a peer reclaims it.
    pub fn restore(config: HostConfig, registry: EngineRegistry, save: &SaveFile) -> Result<Self, BoardsyncError> {
        let mut state = save.restore()?;
        if state.game_phase == GamePhase::InLobby {
            state.players.retain(|p| p.peer_id == PeerId::host());
        } else {
            for player in state.players.iter_mut().filter(|p| p.peer_id != PeerId::host()) {
                player.state = PlayerState::Disconnected;
            }
        }
        tracing::info!(
            map = %save.metadata.map_name,
            turn = save.metadata.turn_number,
            "restoring saved game"
        );
        Self::with_state(config, registry, state)
    }

    fn with_state(config: HostConfig, registry: EngineRegistry, state: GameState) -> Result<Self, BoardsyncError> {
        let engine_ctx = EngineContext {
            peer_id: PeerId::host(),
            is_host: true,
        };
        let engine = registry.create(state.state_type, &engine_ctx)?;
        let last_broadcast = state.to_json()?;
        let sessions = PeerSessions::new(config.session.clone());
        let mut ctx = HostContext {
            config,
            registry,
            engine,
            state: state.clone(),
            last_broadcast,
            sessions,
            needs_full: HashSet::new(),
            parked: HashMap::new(),
            outbox: Vec::new(),
            notifications: Vec::new(),
            last_heartbeat: 0,
        };
        let outputs = ctx.engine.update(state)?;
        for output in outputs {
            match output {
                EngineOutput::Propose(next) => ctx.commit(next)?,
                other => ctx.notifications.push(other),
            }
        }
        Ok(Self {
            router: build_router(),
            ctx,
        })
    }

    /// The authoritative state.
    pub fn state(&self) -> &GameState {
        &self.ctx.state
    }

    pub fn config(&self) -> &HostConfig {
        &self.ctx.config
    }

    /// Peers with a live session.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.ctx.sessions.connected_peers()
    }

    /// Registers a new connection and sends it the bootstrap package.
    pub fn connect(&mut self, peer_id: PeerId) -> Result<(), BoardsyncError> {
        self.ctx.sessions.create(peer_id.clone(), Instant::now())?;
        tracing::info!(%peer_id, version = self.ctx.state.version, "peer connected");
        let game_state = self.ctx.last_broadcast.clone();
        self.ctx.send(
            Recipient::Peer(peer_id.clone()),
            Message::ConnectionPackage {
                game_state,
                peer_id: peer_id.clone(),
            },
        );
        let timestamp = self.ctx.next_heartbeat_timestamp();
        self.ctx.send(Recipient::Peer(peer_id), Message::Heartbeat { timestamp });
        Ok(())
    }

    /// A peer's connection closed. Repeated calls are no-ops.
    pub fn disconnect(&mut self, peer_id: &PeerId) -> Result<(), BoardsyncError> {
        let changed = self.ctx.sessions.disconnect(peer_id, Instant::now());
        if changed.unwrap_or(false) {
            self.ctx.release_players(peer_id)?;
        }
        Ok(())
    }

    /// Routes one raw message. Returns `false` if it was dropped.
    pub fn handle_message(&mut self, from: &PeerId, raw: Value) -> bool {
        self.router.handle_message(&mut self.ctx, from, raw)
    }

    /// Runs a message on behalf of the host's own players, through the
    /// same validation as a remote one.
    pub fn submit_local(&mut self, message: Message) -> Result<(), BoardsyncError> {
        let raw = message.to_value()?;
        self.router.dispatch(&mut self.ctx, &PeerId::host(), raw)?;
        Ok(())
    }

    /// Periodic work: heartbeat every peer, drop peers that went quiet.
    pub fn tick(&mut self) -> Result<(), BoardsyncError> {
        let now = Instant::now();
        if !self.ctx.sessions.connected_peers().is_empty() {
            let timestamp = self.ctx.next_heartbeat_timestamp();
            self.ctx.send(Recipient::All, Message::Heartbeat { timestamp });
        }
        for peer_id in self.ctx.sessions.expire_silent(now) {
            self.ctx.outbox.push(Outbound::Close(peer_id.clone()));
            self.ctx.release_players(&peer_id)?;
        }
        let dropped = self.ctx.sessions.cleanup(now);
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "stale sessions dropped");
        }
        Ok(())
    }

    /// Adds a player controlled on the host machine.
    pub fn add_local_player(&mut self, draft: PlayerDraft) -> Result<PlayerId, BoardsyncError> {
        let value = serde_json::to_value(&draft)?;
        let next = self
            .ctx
            .with_added_player(&PeerId::host(), value)
            .map_err(BoardsyncError::Rejected)?;
        let player_id = next
            .players
            .last()
            .map(|p| p.player_id.clone())
            .ok_or_else(|| BoardsyncError::Rejected("player was not added".into()))?;
        self.ctx.commit(next)?;
        Ok(player_id)
    }

    /// Leaves the lobby: everyone goes to the start space and the first
    /// turn begins.
    pub fn start_game(&mut self) -> Result<(), BoardsyncError> {
        let state = &self.ctx.state;
        if state.game_phase != GamePhase::InLobby {
            return Err(BoardsyncError::Rejected(format!("cannot start a game that is {}", state.game_phase)));
        }
        if state.players.is_empty() {
            return Err(BoardsyncError::Rejected("no players have joined".into()));
        }

        let mut next = state.clone();
        next.place_players_at_start();
        next.board.reset_events();
        next.game_phase = GamePhase::InGame;
        next.turn_phase = TurnPhase::ChangeTurn;
        next.remaining_moves = 0;
        next.moves_taken_this_turn = 0;
        tracing::info!(players = next.players.len(), "starting game");

        self.ctx.send(Recipient::All, Message::StartGame);
        self.ctx.commit(next)
    }

    pub fn pause(&mut self) -> Result<(), BoardsyncError> {
        self.set_game_phase(GamePhase::InGame, GamePhase::Paused)
    }

    pub fn resume(&mut self) -> Result<(), BoardsyncError> {
        self.set_game_phase(GamePhase::Paused, GamePhase::InGame)
    }

    fn set_game_phase(&mut self, from: GamePhase, to: GamePhase) -> Result<(), BoardsyncError> {
        if self.ctx.state.game_phase != from {
            return Err(BoardsyncError::Rejected(format!(
                "game is {}, expected {from}",
                self.ctx.state.game_phase
            )));
        }
        let mut next = self.ctx.state.clone();
        next.game_phase = to;
        tracing::info!(%from, %to, "game phase changed by host");
        self.ctx.commit(next)
    }

    /// Replaces the settings. Only while in the lobby.
    pub fn update_settings(&mut self, settings: GameSettings) -> Result<(), BoardsyncError> {
        if self.ctx.state.game_phase != GamePhase::InLobby {
            return Err(BoardsyncError::Rejected("settings are fixed once the game starts".into()));
        }
        settings.validate()?;
        if self.ctx.state.players.len() > settings.player_limit {
            return Err(BoardsyncError::Rejected(format!(
                "{} players already joined, limit would be {}",
                self.ctx.state.players.len(),
                settings.player_limit
            )));
        }
        let mut next = self.ctx.state.clone();
        next.settings = settings;
        self.ctx.commit(next)
    }

    /// Removes a peer and its players, tells it why, and closes it.
    pub fn kick(&mut self, peer_id: &PeerId, reason: Option<String>) -> Result<(), BoardsyncError> {
        if self.ctx.sessions.remove(peer_id).is_none() {
            return Err(boardsync_session::SessionError::NotFound(peer_id.clone()).into());
        }
        tracing::info!(%peer_id, reason = reason.as_deref().unwrap_or(""), "kicking peer");
        self.ctx.needs_full.remove(peer_id);
        self.ctx.send(Recipient::Peer(peer_id.clone()), Message::Kick { reason });
        self.ctx.outbox.push(Outbound::Close(peer_id.clone()));

        let owned: Vec<PlayerId> = self
            .ctx
            .state
            .players_of_peer(peer_id)
            .map(|p| p.player_id.clone())
            .collect();
        if owned.is_empty() {
            return Ok(());
        }
        for id in &owned {
            self.ctx.parked.remove(id);
        }
        let next = self.ctx.without_players(&owned);
        self.ctx.commit(next)
    }

    /// Feeds a turn input for a host-controlled (or disconnected) player.
    pub fn input(&mut self, input: EngineInput) -> Result<(), BoardsyncError> {
        let outputs = self.ctx.engine.input(input)?;
        for output in outputs {
            match output {
                EngineOutput::Propose(next) => self.ctx.commit(next)?,
                other => self.ctx.notifications.push(other),
            }
        }
        Ok(())
    }

    /// Snapshots the game for later [`restore`](Self::restore).
    pub fn save(&self) -> Result<SaveFile, BoardsyncError> {
        Ok(SaveFile::capture(&self.ctx.state, now_ms())?)
    }

    /// Builds a fresh engine of the state's type, e.g. after the state
    /// type changed.
    pub fn reload_engine(&mut self) -> Result<(), BoardsyncError> {
        let engine_ctx = EngineContext {
            peer_id: PeerId::host(),
            is_host: true,
        };
        self.ctx.engine = self.ctx.registry.create(self.ctx.state.state_type, &engine_ctx)?;
        let next = self.ctx.state.clone();
        self.ctx.commit(next)
    }

    /// Everything queued for delivery since the last call.
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.ctx.outbox)
    }

    /// Engine notifications for the host's own UI.
    pub fn take_notifications(&mut self) -> Vec<EngineOutput> {
        std::mem::take(&mut self.ctx.notifications)
    }
}
