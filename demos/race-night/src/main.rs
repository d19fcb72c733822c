//! Three bots race around a small track against an in-process host.
//!
//! Run with `RUST_LOG=debug` to watch every proposal and broadcast.

use std::time::Duration;

use boardsync::prelude::*;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Track
// ---------------------------------------------------------------------------

/// `0 → … → 3`, then either the long way `4 → … → 8` or the shortcut
/// `3 → 8`, and on to the finish at 12.
fn race_track() -> Board {
    let mut spaces: Vec<Space> = (0..=12)
        .map(|i| {
            let space = Space::new(i, format!("Space {i}"));
            if i < 12 { space.connect_to(i + 1) } else { space }
        })
        .collect();

    spaces[3] = Space::new(3, "Fork").connect_to(4).connect_to(8);
    spaces[5] = spaces[5]
        .clone()
        .with_event(GameEvent::new(Trigger::OnPass, Action::AddMoves { amount: 2 }));
    spaces[7] = spaces[7]
        .clone()
        .with_event(GameEvent::new(Trigger::OnLand, Action::SkipTurns { turns: 1 }));
    spaces[8] = spaces[8].clone().with_event(GameEvent::new(
        Trigger::OnLand,
        Action::Prompt {
            message: "The shortcut is muddy.".into(),
        },
    ));
    spaces[10] = spaces[10]
        .clone()
        .with_event(GameEvent::new(Trigger::OnLand, Action::ModifyRolls { bonus: 1, turns: 2 }));
    spaces[12] = Space::new(12, "Finish").with_event(GameEvent::new(Trigger::OnLand, Action::FinishGame));

    Board::new("Race Night", 0, spaces)
}

// ---------------------------------------------------------------------------
// Bots
// ---------------------------------------------------------------------------

async fn play(name: &'static str, client: ClientHandle, mut events: mpsc::UnboundedReceiver<ClientEvent>) -> Result<(), BoardsyncError> {
    while let Some(event) = events.recv().await {
        let result = match event {
            ClientEvent::Engine(EngineOutput::AwaitingRoll { .. }) => client.roll().await,
            ClientEvent::Engine(EngineOutput::Rolled { roll, moves, .. }) => {
                tracing::info!(name, roll, moves, "rolled");
                Ok(())
            }
            ClientEvent::Engine(EngineOutput::ChooseDestination { options, .. }) => match options.last() {
                Some(space_id) => client.choose_destination(*space_id).await,
                None => Ok(()),
            },
            ClientEvent::Engine(EngineOutput::Prompt { token, message, .. }) => {
                tracing::info!(name, %message, "prompt");
                client.acknowledge(token).await
            }
            ClientEvent::Engine(EngineOutput::GameEnded) => return Ok(()),
            ClientEvent::JoinRejected { reason } | ClientEvent::AddPlayerRejected { reason } => {
                return Err(BoardsyncError::Rejected(reason));
            }
            ClientEvent::Kicked { reason } => {
                return Err(BoardsyncError::Rejected(reason.unwrap_or_else(|| "kicked".into())));
            }
            _ => Ok(()),
        };
        if let Err(error) = result {
            tracing::warn!(name, %error, "bot action failed");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let (transport, connector) = MemoryTransport::new();
    let server = HostServer::builder()
        .board(race_track())
        .seed(42)
        .build_with(transport)?;
    let (host, _notifications) = server.start();

    let mut bots = Vec::new();
    for name in ["Ann", "Bob", "Cat"] {
        let core = ClientCore::new(
            ClientConfig::default(),
            EngineRegistry::with_defaults(),
            vec![PlayerDraft::new(name)],
        )?;
        let (handle, events) = spawn_client(connector.clone(), core);
        bots.push(tokio::spawn(play(name, handle, events)));
    }

    while host.state().await?.players.len() < 3 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    host.start_game().await?;

    for bot in bots {
        bot.await??;
    }

    let state = host.state().await?;
    println!("game over after {} turns (version {})", state.turn_number(), state.version);
    for player in &state.players {
        println!("  {:<6} {:?} turns={}", player.nickname, player.state, player.turns_taken);
    }

    host.shutdown().await?;
    Ok(())
}
