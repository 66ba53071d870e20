//! Session Lifecycle Poller
//!
//! One cooperative loop with two cadences: a heartbeat that keeps an
//! owned record alive, and a poll that refreshes the cached record. The
//! poll detects host migration and the published ready code.
//!
//! The cached record has a single writer (this loop) behind a
//! `watch` channel; readers observe consistent snapshots of it.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::LobbyConfig;
use crate::game::state::PlayerId;
use crate::lobby::directory::{DirectoryClient, DirectoryError};
use crate::lobby::record::{Member, SessionRecord};

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    /// Membership or readiness changed (or a plain refresh).
    LobbyUpdated(Vec<Member>),
    /// The local node became the record's owner.
    HostMigrated,
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// Keep polling.
    Continue,
    /// Ready code published; polling is over.
    ReadyCode(String),
    /// The local node is no longer a member.
    Left,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerExit {
    /// Ready code observed; bootstrap the transport with it.
    ReadyCode(String),
    /// The local node left or the record disappeared.
    Left,
    /// Shutdown was signalled.
    Shutdown,
}

/// Heartbeat/poll loop for one joined session.
pub struct LifecyclePoller {
    client: DirectoryClient,
    local: PlayerId,
    owned: bool,
    record: watch::Sender<SessionRecord>,
    events: mpsc::Sender<LobbyEvent>,
    heartbeat_interval: Duration,
    poll_interval: Duration,
}

impl LifecyclePoller {
    /// Start tracking `record`. Returns the poller and a reader of the
    /// cached record.
    pub fn new(
        client: DirectoryClient,
        record: SessionRecord,
        events: mpsc::Sender<LobbyEvent>,
        config: &LobbyConfig,
    ) -> (Self, watch::Receiver<SessionRecord>) {
        let local = client.local_id();
        let owned = record.is_owned_by(local);
        let (tx, rx) = watch::channel(record);
        (
            Self {
                client,
                local,
                owned,
                record: tx,
                events,
                heartbeat_interval: config.heartbeat_interval,
                poll_interval: config.poll_interval,
            },
            rx,
        )
    }

    /// Whether the local node currently owns the record.
    pub fn is_owner(&self) -> bool {
        self.owned
    }

    /// Latest cached record.
    pub fn record(&self) -> SessionRecord {
        self.record.borrow().clone()
    }

    fn session_id(&self) -> String {
        self.record.borrow().id.clone()
    }

    /// Re-affirm liveness if owned. Failures are logged and retried on the
    /// next tick.
    pub async fn heartbeat_once(&self) -> bool {
        if !self.owned {
            return true;
        }
        let id = self.session_id();
        match self.client.heartbeat(&id).await {
            Ok(()) => {
                debug!(session = %id, "heartbeat");
                true
            }
            Err(e) => {
                warn!(session = %id, error = %e, "heartbeat failed");
                false
            }
        }
    }

    /// Refresh the record once.
    pub async fn poll_once(&mut self) -> PollStep {
        let id = self.session_id();
        let fresh = match self.client.refresh(&id).await {
            Ok(record) => record,
            Err(DirectoryError::NotFound) => {
                info!(session = %id, "session no longer exists");
                return PollStep::Left;
            }
            Err(e) => {
                warn!(session = %id, error = %e, "poll failed");
                return PollStep::Continue;
            }
        };

        if fresh.member(self.local).is_none() {
            info!(session = %id, "no longer a member");
            return PollStep::Left;
        }

        let migrated = !self.owned && fresh.is_owned_by(self.local);
        let ready_code = fresh.ready_code().map(str::to_owned);
        let members = fresh.members.clone();
        self.record.send_replace(fresh);

        if migrated {
            self.owned = true;
            info!(session = %id, "host migrated to local node");
            self.notify(LobbyEvent::HostMigrated);
        }

        if let Some(code) = ready_code {
            info!(session = %id, code = %code, "ready code observed");
            return PollStep::ReadyCode(code);
        }

        self.notify(LobbyEvent::LobbyUpdated(members));
        PollStep::Continue
    }

    /// Deliver a lobby event without waiting on the receiver. A full queue
    /// drops the event; the cached record still carries the change.
    fn notify(&self, event: LobbyEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!(?event, "lobby event queue full, event dropped"),
            Err(TrySendError::Closed(_)) => debug!("lobby event receiver dropped"),
        }
    }

    /// Run both cadences until the ready code appears, the local node
    /// leaves, or shutdown is signalled.
    #[instrument(skip_all, fields(player = %self.local.short()))]
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> PollerExit {
        let mut heartbeat = interval(self.heartbeat_interval);
        let mut poll = interval(self.poll_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    self.heartbeat_once().await;
                }
                _ = poll.tick() => {
                    match self.poll_once().await {
                        PollStep::Continue => {}
                        PollStep::ReadyCode(code) => return PollerExit::ReadyCode(code),
                        PollStep::Left => return PollerExit::Left,
                    }
                }
                _ = shutdown.recv() => {
                    debug!("poller shutdown");
                    return PollerExit::Shutdown;
                }
            }
        }
    }
}
