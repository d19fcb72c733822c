//! Client actor: keeps a [`ClientCore`] connected to the host.
//!
//! The actor owns the core and at most one live connection. A reader task
//! per connection forwards frames tagged with a generation number, so
//! frames from a connection that was replaced are ignored. Heartbeats go
//! out on a fixed interval; a one-second poll drives the reconnect
//! schedule and redials when it says so.

use std::sync::Arc;
use std::time::Duration;

use boardsync_engine::PromptToken;
use boardsync_protocol::{Codec, JsonCodec};
use boardsync_session::{ConnectionStatus, StatusEvent};
use boardsync_state::{GameState, PlayerDraft, PlayerId, SpaceId};
use boardsync_transport::{Connection, Dialer};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::{BoardsyncError, ClientCore, ClientEvent};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const COMMAND_BUFFER: usize = 64;

type ClientOp = Box<dyn FnOnce(&mut ClientCore) + Send>;

enum ClientCommand {
    Run(ClientOp),
    Shutdown,
}

struct Inbound {
    generation: u64,
    /// `None` once the connection closed.
    data: Option<Vec<u8>>,
}

/// Spawns a client that dials the host through `dialer`.
///
/// Everything the UI should react to arrives on the returned receiver.
pub fn spawn_client<D: Dialer>(dialer: D, core: ClientCore) -> (ClientHandle, mpsc::UnboundedReceiver<ClientEvent>) {
    let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
    let (events, event_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();

    let actor = ClientActor {
        dialer,
        core,
        link: None,
        generation: 0,
        codec: JsonCodec,
        receiver,
        events,
        inbound_tx,
        inbound,
    };
    tokio::spawn(actor.run());
    (ClientHandle { commands }, event_rx)
}

struct ClientActor<D> {
    dialer: D,
    core: ClientCore,
    link: Option<mpsc::UnboundedSender<Vec<u8>>>,
    generation: u64,
    codec: JsonCodec,
    receiver: mpsc::Receiver<ClientCommand>,
    events: mpsc::UnboundedSender<ClientEvent>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl<D: Dialer> ClientActor<D> {
    async fn run(mut self) {
        let heartbeat_every = self.core.heartbeat_config().interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        let mut poll = tokio::time::interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);

        self.connect().await;
        self.flush();

        loop {
            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(ClientCommand::Run(op)) => op(&mut self.core),
                    Some(ClientCommand::Shutdown) | None => break,
                },
                Some(inbound) = self.inbound.recv() => self.handle_inbound(inbound),
                _ = heartbeat.tick() => {
                    if self.link.is_some() && self.core.status() == ConnectionStatus::Connected {
                        self.core.heartbeat();
                    }
                }
                _ = poll.tick() => {
                    let events = self.core.tick(Instant::now());
                    if events.iter().any(|e| matches!(e, StatusEvent::AttemptReconnect { .. })) {
                        self.connect().await;
                    }
                }
            }
            self.flush();
            if self.core.is_kicked() {
                tracing::info!("kicked, client stopping");
                break;
            }
        }
        self.link = None;
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        if inbound.generation != self.generation {
            return;
        }
        match inbound.data {
            Some(data) => match self.codec.decode::<Value>(&data) {
                Ok(raw) => {
                    self.core.handle_message(raw);
                }
                Err(error) => tracing::debug!(%error, "undecodable frame from host"),
            },
            None => {
                self.link = None;
                if !self.core.is_kicked() {
                    self.core.handle_disconnection(Instant::now());
                }
            }
        }
    }

    /// Dials the host and starts the reader and writer for the new link.
    async fn connect(&mut self) {
        let conn = match self.dialer.dial().await {
            Ok(conn) => Arc::new(conn),
            Err(error) => {
                tracing::warn!(%error, "could not reach host");
                self.core.handle_disconnection(Instant::now());
                return;
            }
        };
        self.generation += 1;
        let generation = self.generation;
        tracing::info!(conn_id = %conn.id(), generation, "connected to host");

        let (link, mut outgoing) = mpsc::unbounded_channel::<Vec<u8>>();
        self.link = Some(link);

        let writer = Arc::clone(&conn);
        tokio::spawn(async move {
            while let Some(bytes) = outgoing.recv().await {
                if let Err(error) = writer.send(&bytes).await {
                    tracing::debug!(%error, "send to host failed");
                    break;
                }
            }
            let _ = writer.close().await;
        });

        let inbound = self.inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                let data = match conn.recv().await {
                    Ok(Some(data)) => Some(data),
                    Ok(None) => None,
                    Err(error) => {
                        tracing::debug!(%error, "recv from host failed");
                        None
                    }
                };
                let closed = data.is_none();
                if inbound.send(Inbound { generation, data }).is_err() || closed {
                    break;
                }
            }
        });
    }

    fn flush(&mut self) {
        let messages = self.core.take_outbound();
        match &self.link {
            Some(link) => {
                for message in messages {
                    match self.codec.encode(&message) {
                        Ok(bytes) => {
                            let _ = link.send(bytes);
                        }
                        Err(error) => tracing::error!(%error, "encode failed"),
                    }
                }
            }
            None if !messages.is_empty() => {
                tracing::debug!(count = messages.len(), "not connected, dropping outbound messages");
            }
            None => {}
        }
        for event in self.core.take_events() {
            let _ = self.events.send(event);
        }
    }
}

/// Cloneable handle for driving a running client.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    /// Runs `f` against the client core on its own task.
    pub async fn call<R, F>(&self, f: F) -> Result<R, BoardsyncError>
    where
        R: Send + 'static,
        F: FnOnce(&mut ClientCore) -> R + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let op: ClientOp = Box::new(move |core| {
            let _ = reply.send(f(core));
        });
        self.commands
            .send(ClientCommand::Run(op))
            .await
            .map_err(|_| BoardsyncError::Unavailable("client"))?;
        response.await.map_err(|_| BoardsyncError::Unavailable("client"))
    }

    pub async fn roll(&self) -> Result<(), BoardsyncError> {
        self.call(|core| core.roll()).await?
    }

    pub async fn roll_value(&self, value: u32) -> Result<(), BoardsyncError> {
        self.call(move |core| core.roll_value(value)).await?
    }

    pub async fn choose_destination(&self, space_id: SpaceId) -> Result<(), BoardsyncError> {
        self.call(move |core| core.choose_destination(space_id)).await?
    }

    pub async fn acknowledge(&self, token: PromptToken) -> Result<(), BoardsyncError> {
        self.call(move |core| core.acknowledge(token)).await?
    }

    pub async fn add_player(&self, draft: PlayerDraft) -> Result<(), BoardsyncError> {
        self.call(move |core| core.add_player(draft)).await?
    }

    pub async fn change_name(&self, player_id: PlayerId, nickname: String) -> Result<(), BoardsyncError> {
        self.call(move |core| core.change_name(&player_id, nickname)).await
    }

    pub async fn change_color(&self, player_id: PlayerId, color: String) -> Result<(), BoardsyncError> {
        self.call(move |core| core.change_color(&player_id, color)).await
    }

    pub async fn change_peer_color(&self, player_id: PlayerId, color: String) -> Result<(), BoardsyncError> {
        self.call(move |core| core.change_peer_color(&player_id, color)).await
    }

    pub async fn remove_player(&self, player_id: PlayerId) -> Result<(), BoardsyncError> {
        self.call(move |core| core.remove_player(&player_id)).await
    }

    /// The client's mirror of the authoritative state.
    pub async fn state(&self) -> Result<Option<GameState>, BoardsyncError> {
        self.call(|core| core.state().cloned()).await
    }

    pub async fn status(&self) -> Result<ConnectionStatus, BoardsyncError> {
        self.call(|core| core.status()).await
    }

    pub async fn shutdown(&self) -> Result<(), BoardsyncError> {
        self.commands
            .send(ClientCommand::Shutdown)
            .await
            .map_err(|_| BoardsyncError::Unavailable("client"))
    }
}
