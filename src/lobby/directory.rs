//! Session Directory Client
//!
//! The directory service is external; [`SessionDirectory`] is its protocol.
//! [`DirectoryClient`] is what the rest of the crate talks to: it binds the
//! local identity, bounds every remote call with a timeout, and applies
//! the checks that do not need a round trip.
//!
//! Errors are reported, never retried here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{LobbyConfig, SESSION_CAPACITY};
use crate::game::state::PlayerId;
use crate::lobby::record::{Member, SessionRecord, DATA_READY_CODE};
use crate::network::identity::LocalIdentity;

/// Directory errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// No such session or join code.
    #[error("session not found")]
    NotFound,

    /// No free slots.
    #[error("session is full")]
    SessionFull,

    /// The member is already in the session.
    #[error("already joined")]
    AlreadyJoined,

    /// Another session uses this name.
    #[error("session name '{0}' is taken")]
    NameTaken(String),

    /// Unsupported capacity.
    #[error("capacity {0} not supported, sessions hold exactly 2")]
    CapacityViolation(u32),

    /// Operation reserved for the record's owner.
    #[error("only the session owner may do this")]
    NotOwner,

    /// The member is not in the session.
    #[error("not a member of the session")]
    NotMember,

    /// The call exceeded its time bound.
    #[error("directory call '{0}' timed out")]
    Timeout(&'static str),

    /// Transport or backend failure.
    #[error("directory service error: {0}")]
    Service(String),
}

/// Remote directory protocol.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Create a record owned by `owner`.
    async fn create(&self, name: &str, capacity: u32, owner: Member) -> Result<SessionRecord, DirectoryError>;

    /// Fetch a record.
    async fn get(&self, id: &str) -> Result<SessionRecord, DirectoryError>;

    /// Join by short code.
    async fn join_by_code(&self, code: &str, member: Member) -> Result<SessionRecord, DirectoryError>;

    /// Join by id.
    async fn join_by_id(&self, id: &str, member: Member) -> Result<SessionRecord, DirectoryError>;

    /// Re-affirm liveness of a record.
    async fn heartbeat(&self, id: &str) -> Result<(), DirectoryError>;

    /// Set a member's ready flag.
    async fn update_member(&self, id: &str, member: PlayerId, ready: bool) -> Result<SessionRecord, DirectoryError>;

    /// Set a public data key.
    async fn update_data(&self, id: &str, key: &str, value: &str) -> Result<SessionRecord, DirectoryError>;

    /// Remove a member.
    async fn remove_member(&self, id: &str, member: PlayerId) -> Result<(), DirectoryError>;

    /// Records with free slots, newest first, at most `limit`.
    async fn query_open(&self, limit: usize) -> Result<Vec<SessionRecord>, DirectoryError>;
}

/// Timeout-bounded directory access for the local player.
#[derive(Clone)]
pub struct DirectoryClient {
    directory: Arc<dyn SessionDirectory>,
    identity: LocalIdentity,
    call_timeout: Duration,
    list_limit: usize,
}

impl DirectoryClient {
    /// Create a client acting as `identity`.
    pub fn new(directory: Arc<dyn SessionDirectory>, identity: LocalIdentity, config: &LobbyConfig) -> Self {
        Self {
            directory,
            identity,
            call_timeout: config.call_timeout,
            list_limit: config.list_limit,
        }
    }

    /// Local identity.
    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Local player id.
    pub fn local_id(&self) -> PlayerId {
        self.identity.player_id
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, DirectoryError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, timeout_ms = self.call_timeout.as_millis() as u64, "directory call timed out");
                Err(DirectoryError::Timeout(op))
            }
        }
    }

    fn local_member(&self) -> Member {
        Member::new(self.identity.player_id, self.identity.display_name.clone())
    }

    /// Create a session owned by the local player.
    pub async fn create_session(&self, name: &str, capacity: u32) -> Result<SessionRecord, DirectoryError> {
        if capacity != SESSION_CAPACITY {
            return Err(DirectoryError::CapacityViolation(capacity));
        }
        let record = self
            .call("create", self.directory.create(name, capacity, self.local_member()))
            .await?;
        info!(session = %record.id, code = %record.join_code, name, "session created");
        Ok(record)
    }

    /// Join by short code.
    pub async fn join_by_code(&self, code: &str) -> Result<SessionRecord, DirectoryError> {
        let record = self
            .call("join_by_code", self.directory.join_by_code(code, self.local_member()))
            .await?;
        info!(session = %record.id, code, "joined session");
        Ok(record)
    }

    /// Join by id.
    pub async fn join_by_id(&self, id: &str) -> Result<SessionRecord, DirectoryError> {
        let record = self
            .call("join_by_id", self.directory.join_by_id(id, self.local_member()))
            .await?;
        info!(session = %record.id, "joined session");
        Ok(record)
    }

    /// Set a member's ready flag.
    pub async fn set_ready(&self, session_id: &str, member: PlayerId, ready: bool) -> Result<SessionRecord, DirectoryError> {
        debug!(session = %session_id, member = %member.short(), ready, "set ready");
        self.call("update_member", self.directory.update_member(session_id, member, ready))
            .await
    }

    /// Open sessions, newest first.
    pub async fn list_open_sessions(&self) -> Result<Vec<SessionRecord>, DirectoryError> {
        let mut records = self
            .call("query_open", self.directory.query_open(self.list_limit))
            .await?;
        records.retain(|r| r.available_slots() > 0);
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(self.list_limit);
        debug!(count = records.len(), "open sessions listed");
        Ok(records)
    }

    /// Leave a session.
    pub async fn leave_session(&self, session_id: &str, member: PlayerId) -> Result<(), DirectoryError> {
        self.call("remove_member", self.directory.remove_member(session_id, member))
            .await?;
        info!(session = %session_id, member = %member.short(), "left session");
        Ok(())
    }

    /// Publish the relay join code.
    ///
    /// Checked against the caller's cached record: only its owner may publish.
    pub async fn publish_ready_code(&self, cached: &SessionRecord, code: &str) -> Result<SessionRecord, DirectoryError> {
        if !cached.is_owned_by(self.identity.player_id) {
            return Err(DirectoryError::NotOwner);
        }
        let record = self
            .call("update_data", self.directory.update_data(&cached.id, DATA_READY_CODE, code))
            .await?;
        info!(session = %cached.id, code, "ready code published");
        Ok(record)
    }

    /// Re-affirm liveness.
    pub async fn heartbeat(&self, session_id: &str) -> Result<(), DirectoryError> {
        self.call("heartbeat", self.directory.heartbeat(session_id)).await
    }

    /// Fetch the latest record.
    pub async fn refresh(&self, session_id: &str) -> Result<SessionRecord, DirectoryError> {
        self.call("get", self.directory.get(session_id)).await
    }
}
