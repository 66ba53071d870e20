//! Transport Bootstrap
//!
//! Hands a ready session over to the game transport. The owner allocates a
//! relay, starts the authority and its listener, and publishes the join
//! code; a participant resolves the code and connects. Allocation failures
//! are fatal for the session start and are not retried.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::config::{HostConfig, LobbyConfig};
use crate::lobby::directory::{DirectoryClient, DirectoryError};
use crate::lobby::record::SessionRecord;
use crate::lobby::relay::{AllocationError, RelayAllocator};
use crate::network::authority::{Authority, AuthorityError, AuthorityHandle, Role};
use crate::network::client::{ClientError, ClientEvent, ParticipantClient};
use crate::network::identity::LocalIdentity;
use crate::network::protocol::HelloRequest;
use crate::network::server::{AuthorityServer, HostError};

/// Bootstrap errors.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Relay allocation or resolution failed.
    #[error("relay allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// The record is not full.
    #[error("not enough players ({have}/{need})")]
    NotEnoughPlayers {
        /// Current members.
        have: usize,
        /// Required members.
        need: u32,
    },

    /// Some members are not ready.
    #[error("players not ready: {}", .0.join(", "))]
    PlayersNotReady(Vec<String>),

    /// Publishing the ready code failed.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// The authority could not be started.
    #[error("authority error: {0}")]
    Authority(#[from] AuthorityError),

    /// The host listener could not be started.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// The participant could not connect.
    #[error("transport error: {0}")]
    Transport(#[from] ClientError),
}

/// A running authority side.
pub struct HostSession {
    /// Authority command handle.
    pub handle: AuthorityHandle,
    /// Relay join code published to the record.
    pub join_code: String,
    /// Listener address.
    pub addr: SocketAddr,
    /// Stops the listener; the reason is forwarded to the participant.
    pub shutdown: broadcast::Sender<String>,
    /// Listener task.
    pub server: JoinHandle<Result<(), HostError>>,
    /// Authority actor task.
    pub authority: JoinHandle<()>,
}

impl HostSession {
    /// Stop the listener and wait for it.
    pub async fn stop(self, reason: &str) {
        let _ = self.shutdown.send(reason.to_string());
        match self.server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("host listener ended with error: {}", e),
            Err(e) => warn!("host listener task failed: {}", e),
        }
    }
}

/// A connected participant side.
pub struct JoinedSession {
    /// Participant client.
    pub client: ParticipantClient,
    /// Replicated events.
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Starts the authority or participant role for a ready session.
#[derive(Clone)]
pub struct TransportBootstrap {
    relay: Arc<dyn RelayAllocator>,
    identity: LocalIdentity,
    lobby: LobbyConfig,
    host: HostConfig,
}

impl TransportBootstrap {
    /// Create a bootstrap for the local identity.
    pub fn new(relay: Arc<dyn RelayAllocator>, identity: LocalIdentity, lobby: LobbyConfig, host: HostConfig) -> Self {
        Self {
            relay,
            identity,
            lobby,
            host,
        }
    }

    /// Role the local node takes for `record`.
    pub fn role_for(&self, record: &SessionRecord) -> Role {
        if record.is_owned_by(self.identity.player_id) {
            Role::Authority
        } else {
            Role::Participant
        }
    }

    /// Check host-start preconditions on the cached record.
    pub fn check_ready(record: &SessionRecord) -> Result<(), BootstrapError> {
        if !record.is_full() {
            return Err(BootstrapError::NotEnoughPlayers {
                have: record.members.len(),
                need: record.capacity,
            });
        }
        let unready = record.unready_names();
        if !unready.is_empty() {
            return Err(BootstrapError::PlayersNotReady(unready));
        }
        Ok(())
    }

    /// Start as authority.
    ///
    /// The listener is up before the join code is published, so a
    /// participant that sees the code can connect immediately.
    #[instrument(skip_all, fields(session = %record.id))]
    pub async fn start_host(&self, directory: &DirectoryClient, record: &SessionRecord) -> Result<HostSession, BootstrapError> {
        Self::check_ready(record)?;
        if self.role_for(record) != Role::Authority {
            return Err(DirectoryError::NotOwner.into());
        }

        let allocation = tokio::time::timeout(self.lobby.allocation_timeout, self.relay.allocate(record.capacity))
            .await
            .map_err(|_| AllocationError::Timeout)??;

        let (handle, authority) = Authority::spawn(Role::Authority, &self.host.authority())?;

        let mut host_config = self.host.clone();
        host_config.bind_addr = allocation.endpoint.socket_addr();
        let server = AuthorityServer::bind(&host_config, handle.clone(), self.identity.player_id, allocation.key.clone()).await?;
        let addr = server.local_addr()?;
        let shutdown = server.shutdown_handle();
        let server = tokio::spawn(server.run());

        if let Err(e) = directory.publish_ready_code(record, &allocation.join_code).await {
            error!(error = %e, "failed to publish ready code, stopping host");
            let _ = shutdown.send("session start failed".into());
            return Err(e.into());
        }

        info!(code = %allocation.join_code, %addr, "authority started");
        Ok(HostSession {
            handle,
            join_code: allocation.join_code,
            addr,
            shutdown,
            server,
            authority,
        })
    }

    /// Start as participant with the published join code.
    #[instrument(skip(self))]
    pub async fn join(&self, code: &str) -> Result<JoinedSession, BootstrapError> {
        let allocation = tokio::time::timeout(self.lobby.allocation_timeout, self.relay.resolve(code))
            .await
            .map_err(|_| AllocationError::Timeout)??;

        let hello = HelloRequest {
            player_id: self.identity.player_id,
            display_name: self.identity.display_name.clone(),
            key: allocation.key,
            client_version: crate::VERSION.to_string(),
        };
        let (client, events) = ParticipantClient::connect(&allocation.endpoint.url(), hello, self.host.handshake_timeout).await?;

        info!(endpoint = %allocation.endpoint.url(), mark = ?client.mark(), "participant connected");
        Ok(JoinedSession { client, events })
    }
}
