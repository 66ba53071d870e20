//! State Replication Channel
//!
//! Fans authoritative events out to every observer, the authority's own
//! view included. Each broadcast is stamped with a sequence number so an
//! observer fed by an at-least-once transport can drop repeats, and a late
//! joiner can start from a snapshot instead of replayed history.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::core::board::{Cell, GridPos};
use crate::core::hash::StateHash;
use crate::game::events::GameEvent;
use crate::game::state::{Phase, TurnSnapshot};

/// Broadcast sequence number. The first event is 1; 0 means "nothing yet".
pub type Seq = u64;

/// Sequenced event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Position in the authority's broadcast order.
    pub seq: Seq,
    /// The event.
    pub event: GameEvent,
}

/// Snapshot pulled by a late joiner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Last sequence number already reflected in `state`.
    pub seq: Seq,
    /// Turn state at `seq`.
    pub state: TurnSnapshot,
    /// Digest of `state`.
    pub digest: StateHash,
}

impl Snapshot {
    /// Build a snapshot at a sequence point.
    pub fn new(seq: Seq, state: TurnSnapshot) -> Self {
        let digest = state.compute_hash();
        Self { seq, state, digest }
    }

    /// Check that the digest matches the state.
    pub fn verify(&self) -> bool {
        self.state.compute_hash() == self.digest
    }
}

/// Observation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObserveError {
    /// Observer fell behind the channel; resync from a snapshot.
    #[error("observer lagged by {0} events")]
    Lagged(u64),

    /// Authority stopped broadcasting.
    #[error("replication channel closed")]
    Closed,
}

// =============================================================================
// CHANNEL (authority side)
// =============================================================================

/// Authority-side broadcaster.
///
/// Owned by the single authoritative mutator; `publish` takes `&mut self`
/// so sequence numbers are assigned in exactly one place.
pub struct ReplicationChannel {
    tx: broadcast::Sender<Envelope>,
    last_seq: Seq,
}

impl ReplicationChannel {
    /// Create a channel that buffers up to `capacity` events per observer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, last_seq: 0 }
    }

    /// Broadcast events in order. Returns the last sequence number used.
    pub fn publish(&mut self, events: Vec<GameEvent>) -> Seq {
        for event in events {
            self.last_seq += 1;
            let envelope = Envelope { seq: self.last_seq, event };
            // No receivers is fine: late joiners pull a snapshot
            if self.tx.send(envelope).is_err() {
                debug!(seq = self.last_seq, "no observers for event");
            }
        }
        self.last_seq
    }

    /// Last sequence number broadcast.
    pub fn last_seq(&self) -> Seq {
        self.last_seq
    }

    /// Snapshot consistent with everything broadcast so far.
    pub fn snapshot(&self, state: TurnSnapshot) -> Snapshot {
        Snapshot::new(self.last_seq, state)
    }

    /// Sender handle for subscribing observers.
    pub fn sender(&self) -> broadcast::Sender<Envelope> {
        self.tx.clone()
    }

    /// Subscribe a new observer.
    pub fn subscribe(&self) -> Observer {
        Observer::new(self.tx.subscribe())
    }
}

// =============================================================================
// OBSERVER SIDE
// =============================================================================

/// Drops envelopes that were already applied.
#[derive(Debug, Default, Clone)]
pub struct EventDeduper {
    last_applied: Seq,
}

impl EventDeduper {
    /// Create a deduper that has applied nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the envelope is new and should be applied.
    pub fn accept(&mut self, envelope: &Envelope) -> bool {
        if envelope.seq <= self.last_applied {
            debug!(seq = envelope.seq, last = self.last_applied, "duplicate event dropped");
            return false;
        }
        if envelope.seq > self.last_applied + 1 {
            warn!(
                seq = envelope.seq,
                expected = self.last_applied + 1,
                "gap in event stream"
            );
        }
        self.last_applied = envelope.seq;
        true
    }

    /// Move the high-water mark to a snapshot's sequence point.
    pub fn resync(&mut self, seq: Seq) {
        self.last_applied = seq;
    }

    /// Last applied sequence number.
    pub fn last_applied(&self) -> Seq {
        self.last_applied
    }
}

/// In-process observer of an authority.
pub struct Observer {
    rx: broadcast::Receiver<Envelope>,
    dedup: EventDeduper,
}

impl Observer {
    /// Wrap a broadcast receiver.
    pub fn new(rx: broadcast::Receiver<Envelope>) -> Self {
        Self { rx, dedup: EventDeduper::new() }
    }

    /// Next new envelope, in broadcast order.
    pub async fn recv(&mut self) -> Result<Envelope, ObserveError> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if self.dedup.accept(&envelope) {
                        return Ok(envelope);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(ObserveError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(ObserveError::Closed),
            }
        }
    }

    /// Non-blocking variant of [`Observer::recv`]. `Ok(None)` when empty.
    pub fn try_recv(&mut self) -> Result<Option<Envelope>, ObserveError> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if self.dedup.accept(&envelope) {
                        return Ok(Some(envelope));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => return Err(ObserveError::Lagged(n)),
                Err(broadcast::error::TryRecvError::Closed) => return Err(ObserveError::Closed),
            }
        }
    }

    /// Skip everything up to and including a snapshot's sequence point.
    pub fn resync(&mut self, snapshot: &Snapshot) {
        self.dedup.resync(snapshot.seq);
    }
}

// =============================================================================
// REPLICA
// =============================================================================

/// Observer-side copy of the turn state rebuilt from events.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    state: TurnSnapshot,
    seq: Seq,
}

impl Replica {
    /// Start from an authoritative snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self { state: snapshot.state.clone(), seq: snapshot.seq }
    }

    /// Replace local state with a fresh snapshot.
    pub fn reset(&mut self, snapshot: &Snapshot) {
        self.state = snapshot.state.clone();
        self.seq = snapshot.seq;
    }

    /// Apply one envelope. Envelopes at or below the current point are ignored.
    pub fn apply(&mut self, envelope: &Envelope) {
        if envelope.seq <= self.seq {
            return;
        }
        self.seq = envelope.seq;

        match &envelope.event {
            GameEvent::GameStarted => self.state.phase = Phase::InProgress,
            GameEvent::CellPlaced { x, y, mark } => {
                if let Some(pos) = GridPos::checked(*x, *y) {
                    self.state.board.set(pos, Cell::Marked(*mark));
                }
            }
            GameEvent::MoverChanged { mover } => self.state.mover = *mover,
            GameEvent::ScoresChanged { scores } => self.state.scores = *scores,
            GameEvent::GameWon { .. } | GameEvent::GameTied => self.state.phase = Phase::Terminal,
            GameEvent::Rematch => {
                self.state.board.clear();
                self.state.phase = Phase::InProgress;
            }
        }
    }

    /// Current replicated state.
    pub fn state(&self) -> &TurnSnapshot {
        &self.state
    }

    /// Sequence point of the replicated state.
    pub fn seq(&self) -> Seq {
        self.seq
    }

    /// Check the replica against an authoritative snapshot at the same point.
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        self.seq == snapshot.seq && self.state.compute_hash() == snapshot.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::board::Mark;
    use crate::game::turn::TurnStateMachine;

    #[tokio::test]
    async fn test_publish_assigns_sequence_in_order() {
        let mut channel = ReplicationChannel::new(16);
        let mut observer = channel.subscribe();

        let last = channel.publish(vec![GameEvent::GameStarted, GameEvent::mover_changed(Some(Mark::Cross))]);
        assert_eq!(last, 2);

        let first = observer.recv().await.unwrap();
        let second = observer.recv().await.unwrap();
        assert_eq!(first, Envelope { seq: 1, event: GameEvent::GameStarted });
        assert_eq!(second.seq, 2);
    }

    #[test]
    fn test_deduper_drops_repeats() {
        let mut dedup = EventDeduper::new();
        let envelope = Envelope { seq: 1, event: GameEvent::Rematch };

        assert!(dedup.accept(&envelope));
        assert!(!dedup.accept(&envelope));
        assert!(!dedup.accept(&Envelope { seq: 0, event: GameEvent::GameTied }));
        assert!(dedup.accept(&Envelope { seq: 2, event: GameEvent::GameTied }));
        assert_eq!(dedup.last_applied(), 2);
    }

    #[tokio::test]
    async fn test_observer_skips_events_covered_by_snapshot() {
        let mut machine = TurnStateMachine::new();
        let mut channel = ReplicationChannel::new(16);

        // Subscribe first, then snapshot, as a late joiner would
        let mut observer = channel.subscribe();
        channel.publish(machine.start().events);
        channel.publish(machine.apply_move(0, 0, Mark::Cross).events);
        let snapshot = channel.snapshot(machine.snapshot());
        observer.resync(&snapshot);

        channel.publish(machine.apply_move(1, 1, Mark::Circle).events);

        let next = observer.recv().await.unwrap();
        assert_eq!(next.seq, snapshot.seq + 1);
        assert_eq!(next.event, GameEvent::CellPlaced { x: 1, y: 1, mark: Mark::Circle });
    }

    #[tokio::test]
    async fn test_lagged_observer_reports_lag() {
        let mut channel = ReplicationChannel::new(2);
        let mut observer = channel.subscribe();
        channel.publish(vec![GameEvent::GameStarted, GameEvent::Rematch, GameEvent::Rematch, GameEvent::Rematch]);

        assert!(matches!(observer.recv().await, Err(ObserveError::Lagged(_))));
    }

    #[test]
    fn test_try_recv_empty() {
        let channel = ReplicationChannel::new(4);
        let mut observer = channel.subscribe();
        assert_eq!(observer.try_recv(), Ok(None));
    }

    #[test]
    fn test_replica_tracks_authority() {
        let mut machine = TurnStateMachine::new();
        let mut channel = ReplicationChannel::new(64);
        let mut observer = channel.subscribe();
        let mut replica = Replica::default();

        channel.publish(machine.start().events);
        for (x, y) in [(0, 0), (1, 1), (1, 0), (1, 2), (2, 0)] {
            let mark = machine.mover().unwrap();
            channel.publish(machine.apply_move(x, y, mark).events);
        }

        while let Ok(Some(envelope)) = observer.try_recv() {
            replica.apply(&envelope);
            // Repeated delivery changes nothing
            replica.apply(&envelope);
        }

        let snapshot = channel.snapshot(machine.snapshot());
        assert!(snapshot.verify());
        assert!(replica.matches(&snapshot));
        assert_eq!(replica.state().phase, Phase::Terminal);
        assert_eq!(replica.state().scores.cross, 1);
    }

    #[test]
    fn test_replica_from_snapshot() {
        let mut machine = TurnStateMachine::new();
        let mut channel = ReplicationChannel::new(8);
        channel.publish(machine.start().events);
        channel.publish(machine.apply_move(2, 2, Mark::Cross).events);

        let snapshot = channel.snapshot(machine.snapshot());
        let replica = Replica::from_snapshot(&snapshot);
        assert!(replica.matches(&snapshot));
        assert_eq!(replica.state().mover, Some(Mark::Circle));
    }
}
