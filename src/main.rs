//! Tic-Tac-Toe Relay Demo
//!
//! Runs a host and a guest in one process over the in-memory directory
//! and the loopback relay: lobby, ready-up, relay bootstrap, then a
//! scripted game replicated to both sides.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tictactoe_relay::{
    lobby::{
        DirectoryClient, InMemoryDirectory, LifecyclePoller, LobbyEvent, LoopbackRelay, PollerExit,
        SessionDirectory, TransportBootstrap,
    },
    network::{
        client::ClientEvent,
        identity::{IdentityConfig, LocalIdentity},
        replication::Observer,
        Origin,
    },
    GameEvent, HostConfig, LobbyConfig, Mark, VERSION,
};

/// Opening that ends in a top-row win for Cross.
const SCRIPT: [(u8, u8); 5] = [(0, 0), (1, 1), (1, 0), (1, 2), (2, 0)];

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Tic-Tac-Toe Relay v{}", VERSION);

    let lobby = LobbyConfig::from_env();
    let host_config = HostConfig::from_env();
    let directory: Arc<dyn SessionDirectory> = Arc::new(InMemoryDirectory::new());
    let relay = Arc::new(LoopbackRelay::new());

    let host_identity = resolve_identity("host")?;
    let guest_identity = LocalIdentity::anonymous("guest");

    let host = DirectoryClient::new(directory.clone(), host_identity.clone(), &lobby);
    let guest = DirectoryClient::new(directory, guest_identity.clone(), &lobby);
    let host_boot = TransportBootstrap::new(relay.clone(), host_identity, lobby.clone(), host_config.clone());
    let guest_boot = TransportBootstrap::new(relay, guest_identity, lobby.clone(), host_config);

    // === Lobby ===
    let created = host.create_session("demo-room", lobby.capacity).await?;
    let open = guest.list_open_sessions().await?;
    info!(open = open.len(), "guest sees open sessions");
    let target = open.first().context("no open session listed")?;
    let joined = guest.join_by_id(&target.id).await?;

    host.set_ready(&created.id, host.local_id(), true).await?;
    guest.set_ready(&joined.id, guest.local_id(), true).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (host_events_tx, host_events) = mpsc::channel(64);
    let (host_poller, mut host_record) = LifecyclePoller::new(host.clone(), created, host_events_tx, &lobby);
    let host_poll_task = tokio::spawn(host_poller.run(shutdown_tx.subscribe()));
    tokio::spawn(log_lobby_events("host", host_events));

    let (guest_events_tx, guest_events) = mpsc::channel(64);
    let (guest_poller, _guest_record) = LifecyclePoller::new(guest.clone(), joined, guest_events_tx, &lobby);
    let guest_poll_task = tokio::spawn(guest_poller.run(shutdown_tx.subscribe()));
    tokio::spawn(log_lobby_events("guest", guest_events));

    // Host starts once its cached record shows everyone ready
    let ready_record = tokio::time::timeout(STEP_TIMEOUT * 2, async {
        loop {
            {
                let record = host_record.borrow_and_update();
                if record.is_full() && record.all_ready() {
                    return Some(record.clone());
                }
            }
            if host_record.changed().await.is_err() {
                return None;
            }
        }
    })
    .await
    .context("lobby never became ready")?
    .context("host poller stopped")?;

    // === Transport ===
    let hosted = host_boot.start_host(&host, &ready_record).await?;
    // Subscribe before the guest connects so the opening events are seen
    let (mut host_view, _) = hosted.handle.join().await?;

    let code = match guest_poll_task.await? {
        PollerExit::ReadyCode(code) => code,
        other => bail!("guest poller ended without a ready code: {other:?}"),
    };
    let mut joined = guest_boot.join(&code).await?;

    // === Game ===
    for (turn, (x, y)) in SCRIPT.iter().copied().enumerate() {
        let mark = if turn % 2 == 0 { Mark::Cross } else { Mark::Circle };
        match mark {
            Mark::Cross => {
                wait_host_turn(&mut host_view, mark).await?;
                hosted.handle.place_mark(Origin::Local, x, y, mark).await?;
            }
            Mark::Circle => {
                wait_guest_turn(&mut joined.events, mark).await?;
                joined.client.place_mark(x, y).await?;
            }
        }
        info!(?mark, x, y, "move submitted");
    }

    let outcome = tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            match joined.events.recv().await {
                Some(ClientEvent::Game(envelope)) if envelope.event.is_terminal() => return Some(envelope.event),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .context("no outcome replicated")?;

    match outcome {
        Some(GameEvent::GameWon { line, mark }) => {
            info!(?mark, line = line.index, orientation = ?line.orientation, "game won")
        }
        Some(GameEvent::GameTied) => info!("game tied"),
        _ => warn!("guest disconnected before the outcome"),
    }

    let authority = hosted.handle.snapshot().await?;
    let replica = joined.client.state();
    info!(
        cross = authority.state.scores.cross,
        circle = authority.state.scores.circle,
        guest_in_sync = (replica == authority.state),
        digest = %hex::encode(&authority.digest[..8]),
        "final scores"
    );

    // === Teardown ===
    joined.client.leave().await?;
    hosted.stop("demo finished").await;
    let _ = shutdown_tx.send(());
    let _ = host_poll_task.await;

    Ok(())
}

fn resolve_identity(profile: &str) -> Result<LocalIdentity> {
    let config = IdentityConfig::from_env();
    match std::env::var("TTT_AUTH_TOKEN") {
        Ok(token) if config.has_key() => {
            LocalIdentity::from_token(&token, &config, profile).context("identity token rejected")
        }
        _ => Ok(LocalIdentity::anonymous(profile)),
    }
}

async fn log_lobby_events(side: &'static str, mut events: mpsc::Receiver<LobbyEvent>) {
    let mut last_count = 0;
    while let Some(event) = events.recv().await {
        match event {
            LobbyEvent::HostMigrated => info!(side, "host migrated"),
            LobbyEvent::LobbyUpdated(members) => {
                if members.len() != last_count {
                    last_count = members.len();
                    info!(side, members = last_count, "lobby updated");
                }
            }
        }
    }
}

async fn wait_host_turn(view: &mut Observer, mark: Mark) -> Result<()> {
    let wanted = GameEvent::mover_changed(Some(mark));
    tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            match view.recv().await {
                Ok(envelope) if envelope.event == wanted => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(anyhow::Error::from(e)),
            }
        }
    })
    .await
    .context("host turn never came")?
}

async fn wait_guest_turn(events: &mut mpsc::Receiver<ClientEvent>, mark: Mark) -> Result<()> {
    let wanted = GameEvent::mover_changed(Some(mark));
    tokio::time::timeout(STEP_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if matches!(&event, ClientEvent::Game(envelope) if envelope.event == wanted) {
                return Ok(());
            }
        }
        bail!("guest connection closed")
    })
    .await
    .context("guest turn never came")?
}
