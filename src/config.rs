//! Runtime Configuration
//!
//! Plain structs with defaults, optionally overridden from `TTT_*`
//! environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use crate::network::authority::AuthorityConfig;

/// Supported session capacity.
pub const SESSION_CAPACITY: u32 = 2;

/// Lobby and lifecycle settings.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Liveness re-affirmation cadence for the owned record.
    pub heartbeat_interval: Duration,
    /// Record refresh cadence.
    pub poll_interval: Duration,
    /// Upper bound on each directory call.
    pub call_timeout: Duration,
    /// Upper bound on relay allocation and resolution.
    pub allocation_timeout: Duration,
    /// Session capacity. Only [`SESSION_CAPACITY`] is accepted.
    pub capacity: u32,
    /// Maximum records returned by an open-session listing.
    pub list_limit: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            poll_interval: Duration::from_millis(1100),
            call_timeout: Duration::from_secs(5),
            allocation_timeout: Duration::from_secs(10),
            capacity: SESSION_CAPACITY,
            list_limit: 25,
        }
    }
}

impl LobbyConfig {
    /// Defaults overridden by `TTT_HEARTBEAT_SECS`, `TTT_POLL_MS`,
    /// `TTT_CALL_TIMEOUT_MS`, `TTT_ALLOCATION_TIMEOUT_MS` and `TTT_LIST_LIMIT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            heartbeat_interval: env_parse("TTT_HEARTBEAT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            poll_interval: env_parse("TTT_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            call_timeout: env_parse("TTT_CALL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_timeout),
            allocation_timeout: env_parse("TTT_ALLOCATION_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.allocation_timeout),
            capacity: defaults.capacity,
            list_limit: env_parse("TTT_LIST_LIMIT").unwrap_or(defaults.list_limit),
        }
    }
}

/// Authority host settings.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Listen address for the participant connection.
    pub bind_addr: SocketAddr,
    /// Authority command queue capacity.
    pub command_capacity: usize,
    /// Event buffer per observer before it lags.
    pub event_capacity: usize,
    /// Time allowed between connect and `hello`.
    pub handshake_timeout: Duration,
    /// Version reported in `welcome`.
    pub version: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            command_capacity: 64,
            event_capacity: 256,
            handshake_timeout: Duration::from_secs(5),
            version: crate::VERSION.to_string(),
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `TTT_HOST_BIND`, `TTT_COMMAND_CAPACITY` and
    /// `TTT_EVENT_CAPACITY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parse("TTT_HOST_BIND").unwrap_or(defaults.bind_addr),
            command_capacity: env_parse("TTT_COMMAND_CAPACITY").unwrap_or(defaults.command_capacity),
            event_capacity: env_parse("TTT_EVENT_CAPACITY").unwrap_or(defaults.event_capacity),
            ..defaults
        }
    }

    /// Queue sizes for the authority actor.
    pub fn authority(&self) -> AuthorityConfig {
        AuthorityConfig {
            command_capacity: self.command_capacity,
            event_capacity: self.event_capacity,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}
