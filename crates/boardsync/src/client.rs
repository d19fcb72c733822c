//! The client side: a mirror of the host's state plus the local engine.
//!
//! [`ClientCore`] holds no authority. It installs whatever the host
//! sends, runs its engine against it, and turns the engine's proposals
//! into `PROPOSE_GAME_STATE` messages. Like [`crate::HostCore`] it does
//! no I/O; [`crate::peer`] drives it over a real connection.

use boardsync_engine::{EngineContext, EngineInput, EngineOutput, EngineRegistry, GameEngine, PromptToken};
use boardsync_protocol::{Flow, HandlerError, HandlerOptions, Message, MessageType, NetworkProtocol, PeerId};
use boardsync_session::{ConnectionStatus, ConnectionStatusManager, HeartbeatConfig, StatusEvent};
use boardsync_state::{GameState, PlayerDraft, PlayerId, SpaceId, StateDelta};
use serde_json::Value;
use tokio::time::Instant;

use crate::{BoardsyncError, now_ms};

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub heartbeat: HeartbeatConfig,
}

/// What the client's UI should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Engine(EngineOutput),
    Status(StatusEvent),
    /// A new authoritative state was installed.
    StateUpdated { version: u64 },
    JoinRejected { reason: String },
    AddPlayerRejected { reason: String },
    GameStarted,
    Kicked { reason: Option<String> },
}

pub struct ClientContext {
    registry: EngineRegistry,
    peer_id: Option<PeerId>,
    engine: Option<Box<dyn GameEngine>>,
    state: Option<GameState>,
    /// Wire form of `state`; deltas apply to this.
    state_json: Option<Value>,
    /// Local players, sent with every `JOIN`. Once the host has admitted
    /// them they carry their player ids so a rejoin reclaims them.
    players: Vec<PlayerDraft>,
    status: ConnectionStatusManager,
    outbox: Vec<Message>,
    events: Vec<ClientEvent>,
    kicked: bool,
}

impl ClientContext {
    fn request_full_state(&mut self, reason: &str) {
        tracing::info!(reason, "requesting full state");
        self.outbox.push(Message::RequestFullState {
            reason: Some(reason.to_string()),
        });
    }

    fn install(&mut self, raw: Value) -> Result<(), BoardsyncError> {
        let state = GameState::from_json(raw.clone())?;
        self.install_state(state, raw)
    }

    /// Makes `state` (decoded from `raw`) the local mirror and lets the
    /// engine react to it.
    fn install_state(&mut self, state: GameState, raw: Value) -> Result<(), BoardsyncError> {
        let version = state.version;

        let stale_engine = self
            .engine
            .as_ref()
            .is_none_or(|engine| engine.state_type() != state.state_type);
        if stale_engine {
            let peer_id = self
                .peer_id
                .clone()
                .ok_or(BoardsyncError::Rejected("state received before connection package".into()))?;
            let ctx = EngineContext { peer_id, is_host: false };
            self.engine = Some(self.registry.create(state.state_type, &ctx)?);
        }

        if let Some(peer_id) = &self.peer_id {
            let owned: Vec<PlayerDraft> = state
                .players_of_peer(peer_id)
                .map(|p| PlayerDraft {
                    player_id: Some(p.player_id.to_string()),
                    nickname: p.nickname.clone(),
                    player_color: Some(p.player_color.clone()),
                    peer_color: Some(p.peer_color.clone()),
                })
                .collect();
            if !owned.is_empty() {
                self.players = owned;
            }
        }

        self.state = Some(state.clone());
        self.state_json = Some(raw);
        self.events.push(ClientEvent::StateUpdated { version });

        let outputs = match self.engine.as_mut() {
            Some(engine) => engine.update(state)?,
            None => Vec::new(),
        };
        self.route_outputs(outputs)
    }

    fn route_outputs(&mut self, outputs: Vec<EngineOutput>) -> Result<(), BoardsyncError> {
        for output in outputs {
            match output {
                EngineOutput::Propose(next) => {
                    let game_state = next.to_json()?;
                    self.outbox.push(Message::ProposeGameState { game_state });
                }
                other => self.events.push(ClientEvent::Engine(other)),
            }
        }
        Ok(())
    }

    fn drafts_json(&self) -> Result<Vec<Value>, BoardsyncError> {
        Ok(self
            .players
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?)
    }
}

fn on_connection_package(client: &mut ClientContext, _: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let Message::ConnectionPackage { game_state, peer_id } = message else {
        return Ok(());
    };
    tracing::info!(%peer_id, "connection package received");
    if client.peer_id.as_ref() != Some(peer_id) {
        client.engine = None;
    }
    client.peer_id = Some(peer_id.clone());
    client.install(game_state.clone())?;

    let players = client.drafts_json()?;
    client.outbox.push(Message::Join {
        peer_id: peer_id.clone(),
        players,
    });
    Ok(())
}

fn on_game_state(client: &mut ClientContext, _: &PeerId, message: &Message) -> Result<(), HandlerError> {
    if let Message::GameState { game_state } = message {
        client.install(game_state.clone())?;
    }
    Ok(())
}

fn on_delta(client: &mut ClientContext, _: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let Message::GameStateDelta { delta } = message else {
        return Ok(());
    };
    let delta = match StateDelta::from_value(delta.clone()) {
        Ok(delta) => delta,
        Err(error) => {
            tracing::warn!(%error, "malformed delta");
            client.request_full_state("delta_apply_failed");
            return Ok(());
        }
    };

    let current = client.state.as_ref().map(|s| s.version);
    let (Some(version), Some(base)) = (current, client.state_json.as_ref()) else {
        client.request_full_state("version_mismatch");
        return Ok(());
    };
    if !delta.can_apply(version) {
        tracing::debug!(base = delta.base_version, local = version, "delta does not apply");
        client.request_full_state("version_mismatch");
        return Ok(());
    }

    // Both the patch and the state it produces must be valid; anything
    // else leaves the mirror untouched and asks for the truth.
    let patched = delta
        .apply(base)
        .and_then(|raw| Ok((GameState::from_json(raw.clone())?, raw)));
    match patched {
        Ok((state, raw)) => client.install_state(state, raw)?,
        Err(error) => {
            tracing::warn!(%error, "delta could not be applied");
            client.request_full_state("delta_apply_failed");
        }
    }
    Ok(())
}

fn on_heartbeat(client: &mut ClientContext, _: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let Message::Heartbeat { timestamp } = message else {
        return Ok(());
    };
    let events = client.status.record_heartbeat(*timestamp, Instant::now());
    client.events.extend(events.into_iter().map(ClientEvent::Status));
    client.outbox.push(Message::HeartbeatAck { timestamp: *timestamp });
    Ok(())
}

fn on_notice(client: &mut ClientContext, _: &PeerId, message: &Message) -> Result<(), HandlerError> {
    let event = match message {
        Message::JoinRejected { reason } => ClientEvent::JoinRejected { reason: reason.clone() },
        Message::AddPlayerRejected { reason, .. } => ClientEvent::AddPlayerRejected { reason: reason.clone() },
        Message::StartGame => ClientEvent::GameStarted,
        Message::Kick { reason } => {
            client.kicked = true;
            tracing::warn!(reason = reason.as_deref().unwrap_or(""), "kicked by host");
            ClientEvent::Kicked { reason: reason.clone() }
        }
        _ => return Ok(()),
    };
    client.events.push(event);
    Ok(())
}

fn build_router() -> NetworkProtocol<ClientContext> {
    let mut router = NetworkProtocol::new();
    router.use_middleware(|client: &mut ClientContext, _: &PeerId, _: &Message| {
        if client.kicked {
            return Flow::Halt;
        }
        client.status.touch(Instant::now());
        Flow::Next
    });

    router.register_handler(
        MessageType::ConnectionPackage,
        HandlerOptions::new(0, "bootstrap and join"),
        on_connection_package,
    );
    router.register_handler(MessageType::GameState, HandlerOptions::new(0, "install full state"), on_game_state);
    router.register_handler(MessageType::GameStateDelta, HandlerOptions::new(0, "apply delta"), on_delta);
    router.register_handler(MessageType::Heartbeat, HandlerOptions::new(10, "answer heartbeat"), on_heartbeat);
    router.register_handler(
        MessageType::HeartbeatAck,
        HandlerOptions::new(10, "liveness only"),
        |_: &mut ClientContext, _: &PeerId, _: &Message| Ok(()),
    );
    for message_type in [
        MessageType::JoinRejected,
        MessageType::AddPlayerRejected,
        MessageType::StartGame,
        MessageType::Kick,
    ] {
        router.register_handler(message_type, HandlerOptions::new(0, "surface to ui"), on_notice);
    }
    router
}

/// One client peer.
pub struct ClientCore {
    router: NetworkProtocol<ClientContext>,
    ctx: ClientContext,
}

impl ClientCore {
    /// Creates a client that will join with `players` once connected.
    pub fn new(config: ClientConfig, registry: EngineRegistry, players: Vec<PlayerDraft>) -> Result<Self, BoardsyncError> {
        config.heartbeat.validate()?;
        for draft in &players {
            draft.validate()?;
        }
        Ok(Self {
            router: build_router(),
            ctx: ClientContext {
                registry,
                peer_id: None,
                engine: None,
                state: None,
                state_json: None,
                players,
                status: ConnectionStatusManager::new(config.heartbeat, Instant::now()),
                outbox: Vec::new(),
                events: Vec::new(),
                kicked: false,
            },
        })
    }

    /// Routes one raw message from the host. Returns `false` if it was
    /// dropped.
    pub fn handle_message(&mut self, raw: Value) -> bool {
        self.router.handle_message(&mut self.ctx, &PeerId::host(), raw)
    }

    /// The peer id the host assigned to the current connection.
    pub fn peer_id(&self) -> Option<&PeerId> {
        self.ctx.peer_id.as_ref()
    }

    /// The last authoritative state received.
    pub fn state(&self) -> Option<&GameState> {
        self.ctx.state.as_ref()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.ctx.status.status()
    }

    pub fn heartbeat_config(&self) -> &HeartbeatConfig {
        self.ctx.status.config()
    }

    pub fn is_kicked(&self) -> bool {
        self.ctx.kicked
    }

    /// Players this client joins with.
    pub fn local_players(&self) -> &[PlayerDraft] {
        &self.ctx.players
    }

    pub fn input(&mut self, input: EngineInput) -> Result<(), BoardsyncError> {
        let engine = self.ctx.engine.as_mut().ok_or(BoardsyncError::Rejected("not connected".into()))?;
        let outputs = engine.input(input)?;
        self.ctx.route_outputs(outputs)
    }

    pub fn roll(&mut self) -> Result<(), BoardsyncError> {
        self.input(EngineInput::Roll)
    }

    pub fn roll_value(&mut self, value: u32) -> Result<(), BoardsyncError> {
        self.input(EngineInput::RollValue(value))
    }

    pub fn choose_destination(&mut self, space_id: SpaceId) -> Result<(), BoardsyncError> {
        self.input(EngineInput::ChooseDestination(space_id))
    }

    pub fn acknowledge(&mut self, token: PromptToken) -> Result<(), BoardsyncError> {
        self.input(EngineInput::Acknowledge(token))
    }

    /// Asks the host for one more local player. Lobby only.
    pub fn add_player(&mut self, draft: PlayerDraft) -> Result<(), BoardsyncError> {
        draft.validate()?;
        let player = serde_json::to_value(&draft)?;
        self.ctx.outbox.push(Message::ProposeAddPlayer { player });
        Ok(())
    }

    pub fn change_name(&mut self, player_id: &PlayerId, nickname: impl Into<String>) {
        self.ctx.outbox.push(Message::NameChange {
            player_id: player_id.to_string(),
            nickname: nickname.into(),
        });
    }

    pub fn change_color(&mut self, player_id: &PlayerId, player_color: impl Into<String>) {
        self.ctx.outbox.push(Message::ColorChange {
            player_id: player_id.to_string(),
            player_color: player_color.into(),
        });
    }

    pub fn change_peer_color(&mut self, player_id: &PlayerId, peer_color: impl Into<String>) {
        self.ctx.outbox.push(Message::PeerColorChange {
            player_id: player_id.to_string(),
            peer_color: peer_color.into(),
        });
    }

    pub fn remove_player(&mut self, player_id: &PlayerId) {
        self.ctx.outbox.push(Message::RemovePlayer {
            player_id: player_id.to_string(),
        });
    }

    pub fn request_full_state(&mut self, reason: &str) {
        self.ctx.request_full_state(reason);
    }

    /// Queues a heartbeat for the host.
    pub fn heartbeat(&mut self) {
        self.ctx.outbox.push(Message::Heartbeat { timestamp: now_ms() });
    }

    /// Advances the liveness timers.
    pub fn tick(&mut self, now: Instant) -> Vec<StatusEvent> {
        let events = self.ctx.status.poll(now);
        self.ctx.events.extend(events.iter().copied().map(ClientEvent::Status));
        events
    }

    /// The transport reported the link closed.
    pub fn handle_disconnection(&mut self, now: Instant) -> Vec<StatusEvent> {
        let events = self.ctx.status.handle_disconnection(now);
        self.ctx.events.extend(events.iter().copied().map(ClientEvent::Status));
        events
    }

    /// Starts over after the reconnect schedule gave up.
    pub fn reset_status(&mut self, now: Instant) {
        self.ctx.status.reset(now);
    }

    /// Messages to send to the host, in order.
    pub fn take_outbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.ctx.outbox)
    }

    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.ctx.events)
    }
}
