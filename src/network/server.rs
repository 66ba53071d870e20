//! Authority WebSocket Host
//!
//! Accepts the participant's relayed connection, runs the `hello`
//! handshake against the relay key, and bridges the socket to the
//! authority actor: requests go in as peer-origin commands, sequenced
//! events come back out as `event` frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::config::HostConfig;
use crate::game::state::PlayerId;
use crate::network::authority::{AuthorityHandle, Origin, Role};
use crate::network::protocol::{
    now_millis, ClientMessage, ErrorCode, HelloRequest, ServerError, ServerMessage, WelcomeInfo,
};
use crate::network::replication::ObserveError;

/// Host errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Failed to bind the listener.
    #[error("failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

struct Shared {
    handle: AuthorityHandle,
    authority_id: PlayerId,
    key: String,
    /// The single participant slot.
    peer: Mutex<Option<PlayerId>>,
    handshake_timeout: Duration,
    version: String,
}

/// WebSocket endpoint of the authority.
pub struct AuthorityServer {
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<String>,
}

impl AuthorityServer {
    /// Bind the listener at `config.bind_addr`.
    ///
    /// `key` is the hex relay key a participant must present.
    pub async fn bind(
        config: &HostConfig,
        handle: AuthorityHandle,
        authority_id: PlayerId,
        key: String,
    ) -> Result<Self, HostError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                handle,
                authority_id,
                key,
                peer: Mutex::new(None),
                handshake_timeout: config.handshake_timeout,
                version: config.version.clone(),
            }),
            shutdown_tx,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, HostError> {
        Ok(self.listener.local_addr()?)
    }

    /// Sender that stops the accept loop and every connection.
    ///
    /// The string is forwarded to the participant as the shutdown reason.
    pub fn shutdown_handle(&self) -> broadcast::Sender<String> {
        self.shutdown_tx.clone()
    }

    /// Accept connections until shutdown.
    #[instrument(skip(self), fields(authority = %self.shared.authority_id.short()))]
    pub async fn run(self) -> Result<(), HostError> {
        info!(addr = ?self.listener.local_addr().ok(), "authority host listening");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!(%addr, "incoming connection");
                            let shared = self.shared.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(handle_connection(shared, stream, addr, shutdown_rx));
                        }
                        Err(e) => error!("accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("authority host shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

type Incoming = SplitStream<WebSocketStream<TcpStream>>;

async fn handle_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<String>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%addr, "websocket handshake failed: {}", e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    if let Some(peer) = admit(&shared, &mut ws_receiver, &msg_tx, addr).await {
        serve_peer(&shared, peer, &mut ws_receiver, &msg_tx, &mut shutdown_rx).await;

        let mut slot = shared.peer.lock().await;
        if *slot == Some(peer) {
            *slot = None;
        }
        info!(peer = %peer.short(), "participant disconnected");
    }

    drop(msg_tx);
    let _ = sender_task.await;
}

/// Run the `hello` handshake. Returns the admitted participant.
async fn admit(
    shared: &Shared,
    ws_receiver: &mut Incoming,
    msg_tx: &mpsc::Sender<ServerMessage>,
    addr: SocketAddr,
) -> Option<PlayerId> {
    let first = match tokio::time::timeout(shared.handshake_timeout, next_message(ws_receiver, msg_tx)).await {
        Ok(Some(msg)) => msg,
        Ok(None) => return None,
        Err(_) => {
            debug!(%addr, "handshake timed out");
            return None;
        }
    };

    let hello: HelloRequest = match first {
        ClientMessage::Hello(hello) => hello,
        _ => {
            reject(msg_tx, ErrorCode::HandshakeRequired, "send hello first").await;
            return None;
        }
    };

    if hello.key != shared.key {
        warn!(%addr, player = %hello.player_id.short(), "relay key mismatch");
        reject(msg_tx, ErrorCode::BadCredentials, "relay key mismatch").await;
        return None;
    }

    {
        let mut slot = shared.peer.lock().await;
        if let Some(existing) = *slot {
            debug!(%addr, held_by = %existing.short(), "participant slot taken");
            reject(msg_tx, ErrorCode::SessionFull, "session already has a participant").await;
            return None;
        }
        *slot = Some(hello.player_id);
    }

    info!(
        peer = %hello.player_id.short(),
        name = %hello.display_name,
        client_version = %hello.client_version,
        "participant admitted"
    );
    Some(hello.player_id)
}

async fn serve_peer(
    shared: &Shared,
    peer: PlayerId,
    ws_receiver: &mut Incoming,
    msg_tx: &mpsc::Sender<ServerMessage>,
    shutdown_rx: &mut broadcast::Receiver<String>,
) {
    let origin = Origin::Peer(peer);
    let mark = Role::Participant.mark();

    let (mut observer, snapshot) = match shared.handle.join().await {
        Ok(joined) => joined,
        Err(e) => {
            error!("authority unavailable: {}", e);
            return;
        }
    };

    let welcome = ServerMessage::Welcome(WelcomeInfo {
        mark,
        authority_id: shared.authority_id,
        snapshot,
        server_version: shared.version.clone(),
    });
    if msg_tx.send(welcome).await.is_err() {
        return;
    }

    // Second member present: the game can begin
    if let Err(e) = shared.handle.start().await {
        error!("failed to start game: {}", e);
        return;
    }

    loop {
        tokio::select! {
            msg = next_message(ws_receiver, msg_tx) => {
                let Some(msg) = msg else { break };
                match msg {
                    ClientMessage::PlaceMark { x, y } => {
                        if shared.handle.place_mark(origin, x, y, mark).await.is_err() {
                            break;
                        }
                    }
                    ClientMessage::Rematch => {
                        if shared.handle.rematch(origin).await.is_err() {
                            break;
                        }
                    }
                    ClientMessage::SyncRequest => {
                        match shared.handle.snapshot().await {
                            Ok(snapshot) => {
                                observer.resync(&snapshot);
                                if msg_tx.send(ServerMessage::Snapshot(snapshot)).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    ClientMessage::Ping { timestamp } => {
                        let pong = ServerMessage::Pong { timestamp, server_time: now_millis() };
                        if msg_tx.send(pong).await.is_err() {
                            break;
                        }
                    }
                    ClientMessage::Hello(_) => {
                        reject(msg_tx, ErrorCode::InvalidInput, "already joined").await;
                    }
                    ClientMessage::Leave => {
                        debug!(peer = %peer.short(), "participant left");
                        break;
                    }
                }
            }
            event = observer.recv() => {
                match event {
                    Ok(envelope) => {
                        if msg_tx.send(ServerMessage::Event(envelope)).await.is_err() {
                            break;
                        }
                    }
                    Err(ObserveError::Lagged(n)) => {
                        warn!(peer = %peer.short(), lagged = n, "participant lagged, sending snapshot");
                        match shared.handle.snapshot().await {
                            Ok(snapshot) => {
                                observer.resync(&snapshot);
                                if msg_tx.send(ServerMessage::Snapshot(snapshot)).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    Err(ObserveError::Closed) => {
                        let _ = msg_tx.send(ServerMessage::Shutdown { reason: "authority stopped".into() }).await;
                        break;
                    }
                }
            }
            reason = shutdown_rx.recv() => {
                let reason = reason.unwrap_or_else(|_| "host shutting down".into());
                let _ = msg_tx.send(ServerMessage::Shutdown { reason }).await;
                break;
            }
        }
    }
}

/// Next decodable client message. `None` once the socket closes.
async fn next_message(ws_receiver: &mut Incoming, msg_tx: &mpsc::Sender<ServerMessage>) -> Option<ClientMessage> {
    loop {
        let decoded = match ws_receiver.next().await? {
            Ok(Message::Text(text)) => ClientMessage::from_json(&text).map_err(|e| e.to_string()),
            Ok(Message::Binary(data)) => ClientMessage::from_bytes(&data).map_err(|e| e.to_string()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                debug!("websocket read error: {}", e);
                return None;
            }
        };

        match decoded {
            Ok(msg) => return Some(msg),
            Err(e) => {
                debug!("invalid client frame: {}", e);
                reject(msg_tx, ErrorCode::InvalidInput, "invalid message format").await;
            }
        }
    }
}

async fn reject(msg_tx: &mpsc::Sender<ServerMessage>, code: ErrorCode, message: &str) {
    let _ = msg_tx.send(ServerMessage::Error(ServerError::new(code, message))).await;
}
