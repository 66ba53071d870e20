//! Session Record
//!
//! The rendezvous record kept by the directory: members, owner, and the
//! free-form data map that carries the game mode and, once the host has
//! allocated a relay, the ready code.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::state::PlayerId;

/// Directory-assigned session id.
pub type SessionId = String;

/// Data key for the game mode.
pub const DATA_GAME_MODE: &str = "GameMode";
/// Data key for the relay join code published by the host.
pub const DATA_READY_CODE: &str = "GameCode";
/// Game mode value for this crate.
pub const GAME_MODE: &str = "TicTacToe";

/// A member of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member identity.
    pub id: PlayerId,
    /// Name shown in the lobby.
    #[serde(rename = "PlayerName")]
    pub display_name: String,
    /// Advisory ready flag, `"0"`/`"1"` on the wire.
    #[serde(rename = "Ready", with = "ready_flag")]
    pub ready: bool,
}

impl Member {
    /// A member that has not marked ready yet.
    pub fn new(id: PlayerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            ready: false,
        }
    }
}

/// Rendezvous record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Directory id.
    pub id: SessionId,
    /// Display name, unique within the directory.
    pub name: String,
    /// Short code for joining by code.
    pub join_code: String,
    /// Maximum members.
    pub capacity: u32,
    /// Current members in join order.
    pub members: Vec<Member>,
    /// Member currently acting as host.
    pub owner: PlayerId,
    /// Public key/value data.
    pub data: BTreeMap<String, String>,
    /// Creation time, used for newest-first listings.
    pub created_at: DateTime<Utc>,
    /// Last liveness re-affirmation by the owner.
    pub last_heartbeat: DateTime<Utc>,
}

impl SessionRecord {
    /// Record with the owner as sole member.
    pub fn new(id: SessionId, name: impl Into<String>, join_code: String, capacity: u32, owner: Member) -> Self {
        let now = Utc::now();
        let mut data = BTreeMap::new();
        data.insert(DATA_GAME_MODE.to_string(), GAME_MODE.to_string());
        Self {
            id,
            name: name.into(),
            join_code,
            capacity,
            owner: owner.id,
            members: vec![owner],
            data,
            created_at: now,
            last_heartbeat: now,
        }
    }

    /// Free member slots.
    pub fn available_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.members.len() as u32)
    }

    /// Whether every slot is taken.
    pub fn is_full(&self) -> bool {
        self.available_slots() == 0
    }

    /// Whether every current member is ready.
    pub fn all_ready(&self) -> bool {
        self.members.iter().all(|m| m.ready)
    }

    /// Look up a member.
    pub fn member(&self, id: PlayerId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Mutable member lookup.
    pub fn member_mut(&mut self, id: PlayerId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.id == id)
    }

    /// Whether `id` owns the record.
    pub fn is_owned_by(&self, id: PlayerId) -> bool {
        self.owner == id
    }

    /// Relay join code, once published.
    pub fn ready_code(&self) -> Option<&str> {
        self.data.get(DATA_READY_CODE).map(String::as_str)
    }

    /// Names of members not yet ready.
    pub fn unready_names(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| !m.ready)
            .map(|m| m.display_name.clone())
            .collect()
    }
}

mod ready_flag {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ready: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *ready { "1" } else { "0" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match String::deserialize(deserializer)?.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(D::Error::custom(format!("invalid ready flag '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SessionRecord {
        SessionRecord::new(
            "s-1".into(),
            "room",
            "ABC123".into(),
            2,
            Member::new(PlayerId::new([1; 16]), "alice"),
        )
    }

    #[test]
    fn test_ready_flag_wire_format() {
        let mut member = Member::new(PlayerId::new([1; 16]), "alice");
        let json = serde_json::to_value(&member).unwrap();
        assert_eq!(json["Ready"], "0");
        assert_eq!(json["PlayerName"], "alice");

        member.ready = true;
        let json = serde_json::to_string(&member).unwrap();
        assert!(json.contains(r#""Ready":"1""#));
        assert_eq!(serde_json::from_str::<Member>(&json).unwrap(), member);
    }

    #[test]
    fn test_bad_ready_flag_rejected() {
        let mut json = serde_json::to_value(Member::new(PlayerId::new([1; 16]), "a")).unwrap();
        json["Ready"] = "yes".into();
        assert!(serde_json::from_value::<Member>(json).is_err());
    }

    #[test]
    fn test_slots_and_readiness() {
        let mut record = record();
        assert_eq!(record.available_slots(), 1);
        assert!(!record.is_full());
        assert_eq!(record.data.get(DATA_GAME_MODE).map(String::as_str), Some(GAME_MODE));

        record.members.push(Member::new(PlayerId::new([2; 16]), "bob"));
        assert!(record.is_full());
        assert!(!record.all_ready());
        assert_eq!(record.unready_names(), vec!["alice".to_string(), "bob".to_string()]);

        for member in &mut record.members {
            member.ready = true;
        }
        assert!(record.all_ready());
    }

    #[test]
    fn test_ready_code_lookup() {
        let mut record = record();
        assert_eq!(record.ready_code(), None);
        record.data.insert(DATA_READY_CODE.into(), "RELAY1".into());
        assert_eq!(record.ready_code(), Some("RELAY1"));
    }
}
