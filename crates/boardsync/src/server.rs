//! `HostServer` builder and the host actor.
//!
//! The actor is a single Tokio task that owns the [`HostCore`]. Connection
//! tasks and [`HostHandle`]s talk to it through one command channel, so
//! every state change happens in order on one task.

use std::collections::HashMap;

use boardsync_engine::{EngineInput, EngineOutput, EngineRegistry};
use boardsync_protocol::{Codec, JsonCodec, Message, PeerId};
use boardsync_state::{Board, GameRng, GameSettings, GameState, PlayerDraft, PlayerId, SaveFile};
use boardsync_transport::{Transport, WebSocketTransport};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::handler::{Outgoing, PeerLink, handle_connection};
use crate::{BoardsyncError, HostConfig, HostCore, Outbound};

const COMMAND_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, BoardsyncError>>;

/// Commands sent to the host actor.
pub(crate) enum HostCommand {
    Connected { peer_id: PeerId, link: PeerLink },
    Inbound { peer_id: PeerId, data: Vec<u8> },
    Disconnected { peer_id: PeerId },

    StartGame { reply: Reply<()> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },
    UpdateSettings { settings: GameSettings, reply: Reply<()> },
    AddPlayer { draft: PlayerDraft, reply: Reply<PlayerId> },
    /// A message on behalf of the host's own players.
    Submit { message: Message, reply: Reply<()> },
    Kick { peer_id: PeerId, reason: Option<String>, reply: Reply<()> },
    Input { input: EngineInput, reply: Reply<()> },
    Save { reply: Reply<SaveFile> },
    State { reply: oneshot::Sender<GameState> },
    Peers { reply: oneshot::Sender<Vec<PeerId>> },
    Shutdown,
}

/// Builder for configuring and starting a host.
///
/// # Example
///
/// ```rust,ignore
/// let server = HostServer::builder()
///     .bind("0.0.0.0:9000")
///     .settings(GameSettings { player_limit: 6, ..GameSettings::default() })
///     .build()
///     .await?;
/// let (host, events) = server.start();
/// ```
pub struct HostServerBuilder {
    bind_addr: String,
    config: HostConfig,
    settings: GameSettings,
    board: Option<Board>,
    save: Option<SaveFile>,
    registry: Option<EngineRegistry>,
    seed: Option<u64>,
}

impl HostServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            config: HostConfig::default(),
            settings: GameSettings::default(),
            board: None,
            save: None,
            registry: None,
            seed: None,
        }
    }

    /// Sets the address the WebSocket listener binds to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn settings(mut self, settings: GameSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn board(mut self, board: Board) -> Self {
        self.board = Some(board);
        self
    }

    /// Continues a saved game instead of opening a fresh lobby. Board
    /// and settings come from the save.
    pub fn restore(mut self, save: SaveFile) -> Self {
        self.save = Some(save);
        self
    }

    pub fn registry(mut self, registry: EngineRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Seeds the shared dice so a game can be replayed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Binds a WebSocket listener and builds the host on it.
    pub async fn build(self) -> Result<HostServer<WebSocketTransport>, BoardsyncError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        self.build_with(transport)
    }

    /// Builds the host on an already listening transport.
    pub fn build_with<T: Transport>(self, transport: T) -> Result<HostServer<T>, BoardsyncError> {
        let registry = self.registry.unwrap_or_default();
        let core = match self.save {
            Some(save) => HostCore::restore(self.config, registry, &save)?,
            None => {
                let board = self.board.unwrap_or_else(|| Board::linear("Track", 40));
                let rng = match self.seed {
                    Some(seed) => GameRng::seed_from_u64(seed),
                    None => GameRng::from_entropy(),
                };
                HostCore::new(self.config, registry, board, self.settings, rng)?
            }
        };
        Ok(HostServer { transport, core })
    }
}

impl Default for HostServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A host ready to accept peers.
///
/// Call [`start()`](Self::start) to spawn the accept loop and the actor.
pub struct HostServer<T: Transport> {
    transport: T,
    core: HostCore,
}

impl HostServer<WebSocketTransport> {
    /// Starts configuring a host. The transport is picked by the builder:
    /// [`build`](HostServerBuilder::build) listens on a WebSocket,
    /// [`build_with`](HostServerBuilder::build_with) takes any [`Transport`].
    pub fn builder() -> HostServerBuilder {
        HostServerBuilder::new()
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }
}

impl<T: Transport> HostServer<T> {
    pub fn state(&self) -> &GameState {
        self.core.state()
    }

    /// Spawns the host. Engine notifications for the host's own players
    /// arrive on the returned receiver.
    pub fn start(self) -> (HostHandle, mpsc::UnboundedReceiver<EngineOutput>) {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let (events, notifications) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(accept_loop(self.transport, commands.clone()));
        let heartbeat_interval = self.core.config().heartbeat_interval;
        let actor = HostActor {
            core: self.core,
            peers: HashMap::new(),
            codec: JsonCodec,
            receiver,
            events,
            accept_task,
        };
        tokio::spawn(actor.run(heartbeat_interval));

        tracing::info!("host running");
        (HostHandle { commands }, notifications)
    }
}

fn generate_peer_id() -> PeerId {
    let n: u32 = rand::rng().random();
    PeerId(format!("peer-{n:08x}"))
}

async fn accept_loop<T: Transport>(mut transport: T, commands: mpsc::Sender<HostCommand>) {
    loop {
        match transport.accept().await {
            Ok(conn) => {
                let peer_id = generate_peer_id();
                tokio::spawn(handle_connection(conn, peer_id, commands.clone()));
            }
            Err(error) => {
                tracing::error!(%error, "accept failed, no longer accepting peers");
                break;
            }
        }
    }
}

struct HostActor {
    core: HostCore,
    peers: HashMap<PeerId, PeerLink>,
    codec: JsonCodec,
    receiver: mpsc::Receiver<HostCommand>,
    events: mpsc::UnboundedSender<EngineOutput>,
    accept_task: JoinHandle<()>,
}

impl HostActor {
    async fn run(mut self, heartbeat_interval: std::time::Duration) {
        let start = tokio::time::Instant::now() + heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(start, heartbeat_interval);

        loop {
            tokio::select! {
                command = self.receiver.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(error) = self.core.tick() {
                        tracing::warn!(%error, "host tick failed");
                    }
                }
            }
            self.flush();
        }

        self.accept_task.abort();
        for (_, link) in self.peers.drain() {
            let _ = link.send(Outgoing::Close);
        }
        tracing::info!("host stopped");
    }

    /// Returns `false` once the actor should stop.
    fn handle_command(&mut self, command: HostCommand) -> bool {
        match command {
            HostCommand::Connected { peer_id, link } => match self.core.connect(peer_id.clone()) {
                Ok(()) => {
                    self.peers.insert(peer_id, link);
                }
                Err(error) => {
                    tracing::warn!(%peer_id, %error, "refusing connection");
                    let _ = link.send(Outgoing::Close);
                }
            },
            HostCommand::Inbound { peer_id, data } => match self.codec.decode::<Value>(&data) {
                Ok(raw) => {
                    self.core.handle_message(&peer_id, raw);
                }
                Err(error) => tracing::debug!(%peer_id, %error, "undecodable frame"),
            },
            HostCommand::Disconnected { peer_id } => {
                self.peers.remove(&peer_id);
                if let Err(error) = self.core.disconnect(&peer_id) {
                    tracing::warn!(%peer_id, %error, "disconnect handling failed");
                }
            }
            HostCommand::StartGame { reply } => {
                let _ = reply.send(self.core.start_game());
            }
            HostCommand::Pause { reply } => {
                let _ = reply.send(self.core.pause());
            }
            HostCommand::Resume { reply } => {
                let _ = reply.send(self.core.resume());
            }
            HostCommand::UpdateSettings { settings, reply } => {
                let _ = reply.send(self.core.update_settings(settings));
            }
            HostCommand::AddPlayer { draft, reply } => {
                let _ = reply.send(self.core.add_local_player(draft));
            }
            HostCommand::Submit { message, reply } => {
                let _ = reply.send(self.core.submit_local(message));
            }
            HostCommand::Kick { peer_id, reason, reply } => {
                let _ = reply.send(self.core.kick(&peer_id, reason));
            }
            HostCommand::Input { input, reply } => {
                let _ = reply.send(self.core.input(input));
            }
            HostCommand::Save { reply } => {
                let _ = reply.send(self.core.save());
            }
            HostCommand::State { reply } => {
                let _ = reply.send(self.core.state().clone());
            }
            HostCommand::Peers { reply } => {
                let _ = reply.send(self.core.connected_peers());
            }
            HostCommand::Shutdown => return false,
        }
        true
    }

    /// Delivers everything the core queued, encoding each message once.
    fn flush(&mut self) {
        for outbound in self.core.take_outbound() {
            match outbound {
                Outbound::Send { to, message } => {
                    let bytes = match self.codec.encode(&message) {
                        Ok(bytes) => bytes,
                        Err(error) => {
                            tracing::error!(%error, message_type = %message.message_type(), "encode failed");
                            continue;
                        }
                    };
                    for (peer_id, link) in &self.peers {
                        if to.includes(peer_id) {
                            let _ = link.send(Outgoing::Data(bytes.clone()));
                        }
                    }
                }
                Outbound::Close(peer_id) => {
                    if let Some(link) = self.peers.remove(&peer_id) {
                        let _ = link.send(Outgoing::Close);
                    }
                }
            }
        }
        for notification in self.core.take_notifications() {
            let _ = self.events.send(notification);
        }
    }
}

/// Cloneable handle for controlling a running host.
#[derive(Clone)]
pub struct HostHandle {
    commands: mpsc::Sender<HostCommand>,
}

impl HostHandle {
    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> HostCommand) -> Result<R, BoardsyncError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| BoardsyncError::Unavailable("host"))?;
        response.await.map_err(|_| BoardsyncError::Unavailable("host"))
    }

    pub async fn start_game(&self) -> Result<(), BoardsyncError> {
        self.request(|reply| HostCommand::StartGame { reply }).await?
    }

    pub async fn pause(&self) -> Result<(), BoardsyncError> {
        self.request(|reply| HostCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<(), BoardsyncError> {
        self.request(|reply| HostCommand::Resume { reply }).await?
    }

    pub async fn update_settings(&self, settings: GameSettings) -> Result<(), BoardsyncError> {
        self.request(|reply| HostCommand::UpdateSettings { settings, reply })
            .await?
    }

    /// Adds a player that plays on the host machine.
    pub async fn add_player(&self, draft: PlayerDraft) -> Result<PlayerId, BoardsyncError> {
        self.request(|reply| HostCommand::AddPlayer { draft, reply }).await?
    }

    /// Sends a player edit (name, color, removal) for a host player.
    pub async fn submit(&self, message: Message) -> Result<(), BoardsyncError> {
        self.request(|reply| HostCommand::Submit { message, reply }).await?
    }

    pub async fn kick(&self, peer_id: PeerId, reason: Option<String>) -> Result<(), BoardsyncError> {
        self.request(|reply| HostCommand::Kick { peer_id, reason, reply })
            .await?
    }

    /// Drives the turn of a host player, or of a disconnected one.
    pub async fn input(&self, input: EngineInput) -> Result<(), BoardsyncError> {
        self.request(|reply| HostCommand::Input { input, reply }).await?
    }

    pub async fn save(&self) -> Result<SaveFile, BoardsyncError> {
        self.request(|reply| HostCommand::Save { reply }).await?
    }

    /// A copy of the authoritative state.
    pub async fn state(&self) -> Result<GameState, BoardsyncError> {
        self.request(|reply| HostCommand::State { reply }).await
    }

    pub async fn connected_peers(&self) -> Result<Vec<PeerId>, BoardsyncError> {
        self.request(|reply| HostCommand::Peers { reply }).await
    }

    /// Stops the host and closes every connection.
    pub async fn shutdown(&self) -> Result<(), BoardsyncError> {
        self.commands
            .send(HostCommand::Shutdown)
            .await
            .map_err(|_| BoardsyncError::Unavailable("host"))
    }
}
