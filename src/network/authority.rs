//! Authority Host
//!
//! Single-owner actor around the turn state machine. Every mutation goes
//! through one command queue and is processed to completion before the
//! next, so `apply_move` and `rematch` are never invoked concurrently.
//!
//! Commands are role gated: a remote peer may request moves, rematches and
//! snapshots, but only the local authority process may start the game.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::core::board::Mark;
use crate::game::state::PlayerId;
use crate::game::turn::TurnStateMachine;
use crate::network::replication::{Envelope, Observer, ReplicationChannel, Snapshot};

/// Local role, fixed once at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holds ground truth.
    Authority,
    /// Observes replicated state and submits requests.
    Participant,
}

impl Role {
    /// Mark played by a node with this role.
    pub fn mark(self) -> Mark {
        match self {
            Role::Authority => Mark::Cross,
            Role::Participant => Mark::Circle,
        }
    }
}

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The authority process itself.
    Local,
    /// A connected participant.
    Peer(PlayerId),
}

/// Authority commands.
#[derive(Debug)]
pub enum Command {
    /// Begin the first game.
    Start,
    /// Place a mark.
    PlaceMark {
        /// Column.
        x: u8,
        /// Row.
        y: u8,
        /// Mark being played.
        mark: Mark,
    },
    /// Clear the board for another game.
    Rematch,
    /// Pull the current snapshot.
    Snapshot {
        /// Reply channel.
        reply: oneshot::Sender<Snapshot>,
    },
}

impl Command {
    /// Capability check before dispatch.
    pub fn permitted(&self, origin: Origin) -> bool {
        match self {
            Command::Start => origin == Origin::Local,
            Command::PlaceMark { .. } | Command::Rematch | Command::Snapshot { .. } => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::PlaceMark { .. } => "place_mark",
            Command::Rematch => "rematch",
            Command::Snapshot { .. } => "snapshot",
        }
    }
}

/// Authority errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// Only an authority node may own the state machine.
    #[error("local role is not authority")]
    NotAuthority,

    /// The origin may not issue this command.
    #[error("command '{0}' not permitted from this origin")]
    NotPermitted(&'static str),

    /// The actor has stopped.
    #[error("authority stopped")]
    Closed,
}

/// Authority configuration.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Command queue capacity.
    pub command_capacity: usize,
    /// Per-observer event buffer.
    pub event_capacity: usize,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            event_capacity: 256,
        }
    }
}

/// Cloneable handle to a running authority.
#[derive(Clone)]
pub struct AuthorityHandle {
    commands: mpsc::Sender<(Origin, Command)>,
    events: broadcast::Sender<Envelope>,
}

impl AuthorityHandle {
    /// Submit a command after the capability check.
    pub async fn dispatch(&self, origin: Origin, command: Command) -> Result<(), AuthorityError> {
        if !command.permitted(origin) {
            warn!(?origin, command = command.name(), "command rejected by role gate");
            return Err(AuthorityError::NotPermitted(command.name()));
        }
        self.commands
            .send((origin, command))
            .await
            .map_err(|_| AuthorityError::Closed)
    }

    /// Start the first game.
    pub async fn start(&self) -> Result<(), AuthorityError> {
        self.dispatch(Origin::Local, Command::Start).await
    }

    /// Request a move. The state machine silently drops illegal ones.
    pub async fn place_mark(&self, origin: Origin, x: u8, y: u8, mark: Mark) -> Result<(), AuthorityError> {
        self.dispatch(origin, Command::PlaceMark { x, y, mark }).await
    }

    /// Request a rematch.
    pub async fn rematch(&self, origin: Origin) -> Result<(), AuthorityError> {
        self.dispatch(origin, Command::Rematch).await
    }

    /// Pull a snapshot ordered after every command submitted before it.
    pub async fn snapshot(&self) -> Result<Snapshot, AuthorityError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Origin::Local, Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| AuthorityError::Closed)
    }

    /// Subscribe to the event stream.
    ///
    /// The authority's own presentation layer observes through this too.
    pub fn subscribe(&self) -> Observer {
        Observer::new(self.events.subscribe())
    }

    /// Subscribe and pull a snapshot, with the observer positioned after it.
    pub async fn join(&self) -> Result<(Observer, Snapshot), AuthorityError> {
        let mut observer = self.subscribe();
        let snapshot = self.snapshot().await?;
        observer.resync(&snapshot);
        Ok((observer, snapshot))
    }
}

/// The authority actor.
pub struct Authority {
    machine: TurnStateMachine,
    channel: ReplicationChannel,
    commands: mpsc::Receiver<(Origin, Command)>,
}

impl Authority {
    /// Spawn the authority actor.
    ///
    /// Fails unless the local role is [`Role::Authority`].
    pub fn spawn(role: Role, config: &AuthorityConfig) -> Result<(AuthorityHandle, JoinHandle<()>), AuthorityError> {
        if role != Role::Authority {
            return Err(AuthorityError::NotAuthority);
        }

        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let channel = ReplicationChannel::new(config.event_capacity);
        let handle = AuthorityHandle {
            commands: tx,
            events: channel.sender(),
        };

        let actor = Authority {
            machine: TurnStateMachine::new(),
            channel,
            commands: rx,
        };
        let task = tokio::spawn(actor.run());

        Ok((handle, task))
    }

    /// Process commands one at a time in arrival order.
    #[instrument(skip(self))]
    async fn run(mut self) {
        info!("authority started");
        while let Some((origin, command)) = self.commands.recv().await {
            self.handle(origin, command);
        }
        info!(seq = self.channel.last_seq(), "authority stopped");
    }

    fn handle(&mut self, origin: Origin, command: Command) {
        let result = match command {
            Command::Start => self.machine.start(),
            Command::PlaceMark { x, y, mark } => self.machine.apply_move(x, y, mark),
            Command::Rematch => self.machine.rematch(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.channel.snapshot(self.machine.snapshot()));
                return;
            }
        };

        if result.accepted() {
            let seq = self.channel.publish(result.events);
            debug!(?origin, seq, "command applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::GameEvent;
    use crate::game::state::Phase;

    async fn drain(observer: &mut Observer, n: usize) -> Vec<GameEvent> {
        let mut events = Vec::new();
        for _ in 0..n {
            events.push(observer.recv().await.unwrap().event);
        }
        events
    }

    #[tokio::test]
    async fn test_participant_cannot_own_authority() {
        let result = Authority::spawn(Role::Participant, &AuthorityConfig::default());
        assert!(matches!(result, Err(AuthorityError::NotAuthority)));
    }

    #[tokio::test]
    async fn test_peer_cannot_start() {
        let (handle, _task) = Authority::spawn(Role::Authority, &AuthorityConfig::default()).unwrap();
        let peer = Origin::Peer(PlayerId::new([2; 16]));

        let result = handle.dispatch(peer, Command::Start).await;
        assert_eq!(result, Err(AuthorityError::NotPermitted("start")));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_commands_applied_in_order() {
        let (handle, _task) = Authority::spawn(Role::Authority, &AuthorityConfig::default()).unwrap();
        let mut observer = handle.subscribe();
        let peer = Origin::Peer(PlayerId::new([2; 16]));

        handle.start().await.unwrap();
        handle.place_mark(Origin::Local, 0, 0, Mark::Cross).await.unwrap();
        // Racing duplicate from the wrong side: dropped
        handle.place_mark(peer, 0, 0, Mark::Circle).await.unwrap();
        handle.place_mark(peer, 1, 1, Mark::Circle).await.unwrap();

        let events = drain(&mut observer, 6).await;
        assert_eq!(
            events,
            vec![
                GameEvent::GameStarted,
                GameEvent::mover_changed(Some(Mark::Cross)),
                GameEvent::CellPlaced { x: 0, y: 0, mark: Mark::Cross },
                GameEvent::mover_changed(Some(Mark::Circle)),
                GameEvent::CellPlaced { x: 1, y: 1, mark: Mark::Circle },
                GameEvent::mover_changed(Some(Mark::Cross)),
            ]
        );

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.seq, 6);
        assert_eq!(snapshot.state.board.occupied(), 2);
    }

    #[tokio::test]
    async fn test_join_positions_observer_after_snapshot() {
        let (handle, _task) = Authority::spawn(Role::Authority, &AuthorityConfig::default()).unwrap();
        handle.start().await.unwrap();
        handle.place_mark(Origin::Local, 2, 2, Mark::Cross).await.unwrap();

        let (mut observer, snapshot) = handle.join().await.unwrap();
        assert_eq!(snapshot.seq, 4);

        handle.rematch(Origin::Local).await.unwrap();
        let next = observer.recv().await.unwrap();
        assert_eq!(next.seq, 5);
        assert_eq!(next.event, GameEvent::Rematch);
    }

    #[test]
    fn test_role_marks() {
        assert_eq!(Role::Authority.mark(), Mark::Cross);
        assert_eq!(Role::Participant.mark(), Mark::Circle);
    }
}
