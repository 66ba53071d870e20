//! Protocol Messages
//!
//! Wire format between the authority host and a participant over the
//! relayed WebSocket. Messages are serialized as JSON text frames for
//! debugging ease, with bincode binary frames accepted as well.

use serde::{Deserialize, Serialize};

use crate::core::board::Mark;
use crate::game::state::PlayerId;
use crate::network::replication::{Envelope, Snapshot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from participant to authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame on a connection.
    Hello(HelloRequest),

    /// Request to place the participant's own mark.
    PlaceMark { x: u8, y: u8 },

    /// Request a rematch.
    Rematch,

    /// Request the current snapshot (after lag or reconnect).
    SyncRequest,

    /// Ping for latency measurement.
    Ping { timestamp: u64 },

    /// Participant is leaving.
    Leave,
}

/// Handshake request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
    /// Participant identity.
    pub player_id: PlayerId,
    /// Name shown to the other side.
    pub display_name: String,
    /// Relay allocation key, hex encoded.
    pub key: String,
    /// Client version for compatibility check.
    pub client_version: String,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from authority to participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome(WelcomeInfo),

    /// Sequenced game event.
    Event(Envelope),

    /// Full state, in reply to a sync request or after lag.
    Snapshot(Snapshot),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Authority is shutting down.
    Shutdown { reason: String },
}

/// Handshake result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Mark assigned to this participant.
    pub mark: Mark,
    /// Authority's identity.
    pub authority_id: PlayerId,
    /// State at the moment of joining.
    pub snapshot: Snapshot,
    /// Server version.
    pub server_version: String,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed frame.
    InvalidInput,
    /// A request arrived before `hello`.
    HandshakeRequired,
    /// Relay key did not match the allocation.
    BadCredentials,
    /// The session already has its participant.
    SessionFull,
    /// Request not allowed for this role.
    NotPermitted,
}

impl ServerError {
    /// Create an error payload.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
