//! Participant Client
//!
//! WebSocket client for the non-authoritative side. It submits move and
//! rematch requests and rebuilds the authority's state from sequenced
//! events. It never decides an outcome itself.

use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::core::board::Mark;
use crate::game::state::{PlayerId, TurnSnapshot};
use crate::network::protocol::{
    now_millis, ClientMessage, ErrorCode, HelloRequest, ServerError, ServerMessage, WelcomeInfo,
};
use crate::network::replication::{Envelope, EventDeduper, Replica, Seq, Snapshot};

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connect or handshake took too long.
    #[error("connection timed out")]
    Timeout,

    /// Authority refused the handshake.
    #[error("handshake rejected ({code:?}): {message}")]
    Rejected {
        /// Error code.
        code: ErrorCode,
        /// Server message.
        message: String,
    },

    /// Unexpected or corrupt frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection is gone.
    #[error("connection closed")]
    Closed,
}

/// Notifications delivered to the participant's presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// New authoritative event, already applied to the replica.
    Game(Envelope),
    /// Replica replaced by a snapshot.
    Resynced(Snapshot),
    /// Authority reported an error.
    Error(ServerError),
    /// Authority closed the session.
    Shutdown(String),
}

type Incoming = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connected participant.
pub struct ParticipantClient {
    outgoing: mpsc::Sender<ClientMessage>,
    replica: watch::Receiver<Replica>,
    mark: Mark,
    authority_id: PlayerId,
    reader: JoinHandle<()>,
}

impl ParticipantClient {
    /// Connect, send `hello`, and wait for `welcome`.
    ///
    /// `timeout` bounds the connect and the handshake separately.
    pub async fn connect(
        url: &str,
        hello: HelloRequest,
        timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| ClientError::Timeout)??;
        let (mut write, mut read) = ws_stream.split();

        let player = hello.player_id;
        let text = ClientMessage::Hello(hello)
            .to_json()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        write.send(Message::Text(text)).await?;

        let welcome = tokio::time::timeout(timeout, await_welcome(&mut read))
            .await
            .map_err(|_| ClientError::Timeout)??;

        if !welcome.snapshot.verify() {
            return Err(ClientError::Protocol("welcome snapshot digest mismatch".into()));
        }
        info!(
            player = %player.short(),
            authority = %welcome.authority_id.short(),
            mark = ?welcome.mark,
            seq = welcome.snapshot.seq,
            "joined authority"
        );

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ClientMessage>(64);
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(256);
        let (replica_tx, replica_rx) = watch::channel(Replica::from_snapshot(&welcome.snapshot));

        // Writer: drains requests into the socket.
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let leaving = msg == ClientMessage::Leave;
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("failed to serialize request: {}", e);
                        continue;
                    }
                };
                if write.send(Message::Text(text)).await.is_err() || leaving {
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Reader: applies events in order, dropping repeats.
        let resync_tx = outgoing_tx.clone();
        let mut dedup = EventDeduper::new();
        dedup.resync(welcome.snapshot.seq);
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let msg = match frame.map_err(ClientError::from).and_then(decode) {
                    Ok(Some(msg)) => msg,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("dropping frame: {}", e);
                        continue;
                    }
                };

                let event = match msg {
                    ServerMessage::Event(envelope) => {
                        let gap = envelope.seq > dedup.last_applied() + 1;
                        if !dedup.accept(&envelope) {
                            continue;
                        }
                        replica_tx.send_modify(|replica| replica.apply(&envelope));
                        if gap {
                            let _ = resync_tx.try_send(ClientMessage::SyncRequest);
                        }
                        ClientEvent::Game(envelope)
                    }
                    ServerMessage::Snapshot(snapshot) => {
                        if !snapshot.verify() {
                            warn!(seq = snapshot.seq, "snapshot digest mismatch, ignored");
                            continue;
                        }
                        dedup.resync(snapshot.seq);
                        replica_tx.send_modify(|replica| replica.reset(&snapshot));
                        ClientEvent::Resynced(snapshot)
                    }
                    ServerMessage::Error(err) => ClientEvent::Error(err),
                    ServerMessage::Shutdown { reason } => {
                        let _ = event_tx.send(ClientEvent::Shutdown(reason)).await;
                        break;
                    }
                    ServerMessage::Pong { timestamp, .. } => {
                        debug!(rtt_ms = now_millis().saturating_sub(timestamp), "pong");
                        continue;
                    }
                    ServerMessage::Welcome(_) => continue,
                };

                if event_tx.send(event).await.is_err() {
                    debug!("event receiver dropped");
                }
            }
            debug!("participant reader ended");
        });

        Ok((
            Self {
                outgoing: outgoing_tx,
                replica: replica_rx,
                mark: welcome.mark,
                authority_id: welcome.authority_id,
                reader,
            },
            event_rx,
        ))
    }

    /// Mark assigned by the authority.
    pub fn mark(&self) -> Mark {
        self.mark
    }

    /// The authority's identity.
    pub fn authority_id(&self) -> PlayerId {
        self.authority_id
    }

    /// Current replicated state.
    pub fn state(&self) -> TurnSnapshot {
        self.replica.borrow().state().clone()
    }

    /// Sequence point of the replicated state.
    pub fn seq(&self) -> Seq {
        self.replica.borrow().seq()
    }

    /// Receiver that wakes on every replica change.
    pub fn watch(&self) -> watch::Receiver<Replica> {
        self.replica.clone()
    }

    /// Request a move with the assigned mark.
    pub async fn place_mark(&self, x: u8, y: u8) -> Result<(), ClientError> {
        self.send(ClientMessage::PlaceMark { x, y }).await
    }

    /// Request a rematch.
    pub async fn rematch(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::Rematch).await
    }

    /// Ask for a fresh snapshot.
    pub async fn sync(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::SyncRequest).await
    }

    /// Measure round trip; logged when the pong arrives.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::Ping { timestamp: now_millis() }).await
    }

    /// Leave the session and close the socket.
    pub async fn leave(self) -> Result<(), ClientError> {
        self.send(ClientMessage::Leave).await?;
        let _ = self.reader.await;
        Ok(())
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        self.outgoing.send(msg).await.map_err(|_| ClientError::Closed)
    }
}

async fn await_welcome(read: &mut Incoming) -> Result<WelcomeInfo, ClientError> {
    while let Some(frame) = read.next().await {
        match decode(frame?)? {
            Some(ServerMessage::Welcome(welcome)) => return Ok(welcome),
            Some(ServerMessage::Error(err)) => {
                return Err(ClientError::Rejected { code: err.code, message: err.message });
            }
            Some(ServerMessage::Shutdown { .. }) | None => return Err(ClientError::Closed),
            Some(other) => debug!(?other, "ignoring frame before welcome"),
        }
    }
    Err(ClientError::Closed)
}

/// Decode one frame. `Ok(None)` on close.
fn decode(frame: Message) -> Result<Option<ServerMessage>, ClientError> {
    match frame {
        Message::Text(text) => ServerMessage::from_json(&text)
            .map(Some)
            .map_err(|e| ClientError::Protocol(e.to_string())),
        Message::Binary(data) => ServerMessage::from_bytes(&data)
            .map(Some)
            .map_err(|e| ClientError::Protocol(e.to_string())),
        Message::Close(_) => Ok(None),
        _ => Err(ClientError::Protocol("control frame".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::game::events::GameEvent;
    use crate::game::state::Phase;
    use crate::network::authority::{Authority, AuthorityConfig, AuthorityHandle, Origin, Role};
    use crate::network::server::AuthorityServer;

    const KEY: &str = "00ff00ff";
    const WAIT: Duration = Duration::from_secs(5);

    async fn host() -> (String, AuthorityHandle) {
        let (handle, _task) = Authority::spawn(Role::Authority, &AuthorityConfig::default()).unwrap();
        let server = AuthorityServer::bind(&HostConfig::default(), handle.clone(), PlayerId::new([1; 16]), KEY.into())
            .await
            .unwrap();
        let url = format!("ws://{}", server.local_addr().unwrap());
        tokio::spawn(server.run());
        (url, handle)
    }

    fn hello(key: &str) -> HelloRequest {
        HelloRequest {
            player_id: PlayerId::new([2; 16]),
            display_name: "guest".into(),
            key: key.into(),
            client_version: "test".into(),
        }
    }

    /// Read game events until one matches.
    async fn until(events: &mut mpsc::Receiver<ClientEvent>, wanted: &GameEvent) -> Envelope {
        tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Some(ClientEvent::Game(envelope)) if &envelope.event == wanted => return envelope,
                    Some(_) => {}
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_rejected_key() {
        let (url, _handle) = host().await;
        let result = ParticipantClient::connect(&url, hello("bad"), WAIT).await;
        assert!(matches!(result, Err(ClientError::Rejected { code: ErrorCode::BadCredentials, .. })));
    }

    #[tokio::test]
    async fn test_full_game_over_websocket() {
        let (url, handle) = host().await;
        let (client, mut events) = ParticipantClient::connect(&url, hello(KEY), WAIT).await.unwrap();
        assert_eq!(client.mark(), Mark::Circle);

        let to_cross = GameEvent::mover_changed(Some(Mark::Cross));
        let to_circle = GameEvent::mover_changed(Some(Mark::Circle));
        until(&mut events, &to_cross).await;

        // Cross takes the top row while Circle answers in the middle
        handle.place_mark(Origin::Local, 0, 0, Mark::Cross).await.unwrap();
        until(&mut events, &to_circle).await;
        client.place_mark(1, 1).await.unwrap();
        until(&mut events, &to_cross).await;
        handle.place_mark(Origin::Local, 1, 0, Mark::Cross).await.unwrap();
        until(&mut events, &to_circle).await;
        client.place_mark(1, 2).await.unwrap();
        until(&mut events, &to_cross).await;
        handle.place_mark(Origin::Local, 2, 0, Mark::Cross).await.unwrap();

        let won = tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Some(ClientEvent::Game(Envelope { event: GameEvent::GameWon { mark, .. }, .. })) => return mark,
                    Some(_) => {}
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(won, Mark::Cross);

        let state = client.state();
        assert_eq!(state.phase, Phase::Terminal);
        assert_eq!(state.scores.cross, 1);
        assert_eq!(state.mover, None);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(client.seq(), snapshot.seq);
        assert_eq!(client.state(), snapshot.state);
    }

    #[tokio::test]
    async fn test_participant_cannot_move_out_of_turn() {
        let (url, handle) = host().await;
        let (client, mut events) = ParticipantClient::connect(&url, hello(KEY), WAIT).await.unwrap();
        until(&mut events, &GameEvent::mover_changed(Some(Mark::Cross))).await;

        // Circle tries to move first; the authority drops it
        client.place_mark(0, 0).await.unwrap();
        client.sync().await.unwrap();
        let snapshot = tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Some(ClientEvent::Resynced(snapshot)) => return snapshot,
                    Some(_) => {}
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(snapshot.state.board.occupied(), 0);
        assert_eq!(snapshot, handle.snapshot().await.unwrap());
    }

    #[test]
    fn test_decode_close() {
        assert!(matches!(decode(Message::Close(None)), Ok(None)));
        assert!(decode(Message::Text("nope".into())).is_err());
    }
}
