//! Per-connection tasks on the host.
//!
//! Each accepted connection gets a reader (this function) and a writer
//! task. The reader forwards raw frames to the host actor; the writer
//! drains the link the actor holds for the peer. The two directions never
//! wait on each other.

use std::sync::Arc;

use boardsync_protocol::PeerId;
use boardsync_transport::Connection;
use tokio::sync::mpsc;

use crate::server::HostCommand;

/// What the host actor asks a connection's writer to do.
#[derive(Debug)]
pub(crate) enum Outgoing {
    Data(Vec<u8>),
    /// Flush and close.
    Close,
}

pub(crate) type PeerLink = mpsc::UnboundedSender<Outgoing>;

/// Tells the host the peer is gone however the reader exits.
struct DisconnectGuard {
    peer_id: PeerId,
    commands: mpsc::Sender<HostCommand>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let peer_id = self.peer_id.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let _ = commands.send(HostCommand::Disconnected { peer_id }).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Connection>(
    conn: C,
    peer_id: PeerId,
    commands: mpsc::Sender<HostCommand>,
) {
    let conn = Arc::new(conn);
    let (link, mut outgoing) = mpsc::unbounded_channel();
    tracing::debug!(conn_id = %conn.id(), %peer_id, "handling new connection");

    if commands
        .send(HostCommand::Connected {
            peer_id: peer_id.clone(),
            link,
        })
        .await
        .is_err()
    {
        return;
    }
    let _guard = DisconnectGuard {
        peer_id: peer_id.clone(),
        commands: commands.clone(),
    };

    let writer_conn = Arc::clone(&conn);
    let writer_peer = peer_id.clone();
    tokio::spawn(async move {
        while let Some(item) = outgoing.recv().await {
            match item {
                Outgoing::Data(bytes) => {
                    if let Err(error) = writer_conn.send(&bytes).await {
                        tracing::debug!(peer_id = %writer_peer, %error, "send failed");
                        break;
                    }
                }
                Outgoing::Close => break,
            }
        }
        let _ = writer_conn.close().await;
    });

    loop {
        match conn.recv().await {
            Ok(Some(data)) => {
                let inbound = HostCommand::Inbound {
                    peer_id: peer_id.clone(),
                    data,
                };
                if commands.send(inbound).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::info!(%peer_id, "connection closed cleanly");
                break;
            }
            Err(error) => {
                tracing::debug!(%peer_id, %error, "recv error");
                break;
            }
        }
    }
    // _guard drops here and reports the disconnect.
}
