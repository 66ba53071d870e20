//! In-Memory Directory
//!
//! Process-local [`SessionDirectory`] used by the demo binary and tests.
//! Ownership passes to the longest-standing remaining member when the
//! owner leaves, and a record is dropped once its last member leaves.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::game::state::PlayerId;
use crate::lobby::directory::{DirectoryError, SessionDirectory};
use crate::lobby::random_code;
use crate::lobby::record::{Member, SessionRecord};

const JOIN_CODE_LEN: usize = 6;

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<String, SessionRecord>,
    last_created: Option<DateTime<Utc>>,
}

impl Inner {
    /// Creation stamps are strictly increasing so listings order stably.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_created {
            if now <= last {
                now = last + ChronoDuration::microseconds(1);
            }
        }
        self.last_created = Some(now);
        now
    }

    fn unique_code(&self) -> String {
        loop {
            let code = random_code(JOIN_CODE_LEN);
            if !self.sessions.values().any(|s| s.join_code == code) {
                return code;
            }
        }
    }

    fn record_mut(&mut self, id: &str) -> Result<&mut SessionRecord, DirectoryError> {
        self.sessions.get_mut(id).ok_or(DirectoryError::NotFound)
    }
}

/// In-process session directory.
#[derive(Default)]
pub struct InMemoryDirectory {
    inner: RwLock<Inner>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Whether the directory holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn add_member(record: &mut SessionRecord, member: Member) -> Result<SessionRecord, DirectoryError> {
    if record.member(member.id).is_some() {
        return Err(DirectoryError::AlreadyJoined);
    }
    if record.is_full() {
        return Err(DirectoryError::SessionFull);
    }
    debug!(session = %record.id, member = %member.id.short(), "member added");
    record.members.push(member);
    Ok(record.clone())
}

#[async_trait]
impl SessionDirectory for InMemoryDirectory {
    async fn create(&self, name: &str, capacity: u32, owner: Member) -> Result<SessionRecord, DirectoryError> {
        if capacity == 0 {
            return Err(DirectoryError::CapacityViolation(capacity));
        }

        let mut inner = self.inner.write().await;
        if inner.sessions.values().any(|s| s.name == name) {
            return Err(DirectoryError::NameTaken(name.to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let code = inner.unique_code();
        let mut record = SessionRecord::new(id.clone(), name, code, capacity, owner);
        record.created_at = inner.next_created_at();
        record.last_heartbeat = record.created_at;

        inner.sessions.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<SessionRecord, DirectoryError> {
        self.inner.read().await.sessions.get(id).cloned().ok_or(DirectoryError::NotFound)
    }

    async fn join_by_code(&self, code: &str, member: Member) -> Result<SessionRecord, DirectoryError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .sessions
            .values_mut()
            .find(|s| s.join_code.eq_ignore_ascii_case(code))
            .ok_or(DirectoryError::NotFound)?;
        add_member(record, member)
    }

    async fn join_by_id(&self, id: &str, member: Member) -> Result<SessionRecord, DirectoryError> {
        let mut inner = self.inner.write().await;
        add_member(inner.record_mut(id)?, member)
    }

    async fn heartbeat(&self, id: &str) -> Result<(), DirectoryError> {
        let mut inner = self.inner.write().await;
        inner.record_mut(id)?.last_heartbeat = Utc::now();
        Ok(())
    }

    async fn update_member(&self, id: &str, member: PlayerId, ready: bool) -> Result<SessionRecord, DirectoryError> {
        let mut inner = self.inner.write().await;
        let record = inner.record_mut(id)?;
        record.member_mut(member).ok_or(DirectoryError::NotMember)?.ready = ready;
        Ok(record.clone())
    }

    async fn update_data(&self, id: &str, key: &str, value: &str) -> Result<SessionRecord, DirectoryError> {
        let mut inner = self.inner.write().await;
        let record = inner.record_mut(id)?;
        record.data.insert(key.to_string(), value.to_string());
        Ok(record.clone())
    }

    async fn remove_member(&self, id: &str, member: PlayerId) -> Result<(), DirectoryError> {
        let mut inner = self.inner.write().await;
        let record = inner.record_mut(id)?;
        let before = record.members.len();
        record.members.retain(|m| m.id != member);
        if record.members.len() == before {
            return Err(DirectoryError::NotMember);
        }

        let next_owner = record.members.first().map(|m| m.id);
        match next_owner {
            Some(next) if record.owner == member => {
                record.owner = next;
                info!(session = %id, owner = %next.short(), "ownership transferred");
            }
            Some(_) => {}
            None => {
                inner.sessions.remove(id);
                debug!(session = %id, "empty session removed");
            }
        }
        Ok(())
    }

    async fn query_open(&self, limit: usize) -> Result<Vec<SessionRecord>, DirectoryError> {
        let inner = self.inner.read().await;
        let mut open: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|s| s.available_slots() > 0)
            .cloned()
            .collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        open.truncate(limit);
        Ok(open)
    }
}
