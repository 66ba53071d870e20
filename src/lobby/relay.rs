//! Relay Allocation
//!
//! The relay service is external; [`RelayAllocator`] is its protocol. A
//! host allocates a slot and receives a join code, a participant resolves
//! that code to the same endpoint plus the credentials it must present.
//!
//! [`LoopbackRelay`] stands in for the service inside one process: the
//! "relay endpoint" is a free port on 127.0.0.1 that the host listens on.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::lobby::random_code;

const RELAY_CODE_LEN: usize = 6;

/// Allocation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// Unknown join code.
    #[error("join code not found")]
    NotFound,

    /// The service did not answer in time.
    #[error("relay allocation timed out")]
    Timeout,

    /// Service failure.
    #[error("relay service error: {0}")]
    Service(String),
}

/// Where the relayed transport is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    /// Relay address.
    pub address: IpAddr,
    /// Relay port.
    pub port: u16,
}

impl RelayEndpoint {
    /// Socket address of the endpoint.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// WebSocket URL of the endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}", self.socket_addr())
    }
}

/// Host-side allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAllocation {
    /// Allocation id.
    pub allocation_id: String,
    /// Code participants resolve.
    pub join_code: String,
    /// Relay endpoint.
    pub endpoint: RelayEndpoint,
    /// Shared key, hex encoded.
    pub key: String,
    /// Opaque host connection data.
    pub connection_data: Vec<u8>,
}

/// Participant-side allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAllocation {
    /// Relay endpoint.
    pub endpoint: RelayEndpoint,
    /// Shared key, hex encoded.
    pub key: String,
    /// Opaque participant connection data.
    pub connection_data: Vec<u8>,
    /// The host's connection data.
    pub host_connection_data: Vec<u8>,
}

/// Relay allocation protocol.
#[async_trait]
pub trait RelayAllocator: Send + Sync {
    /// Reserve a relay slot for `capacity` members.
    async fn allocate(&self, capacity: u32) -> Result<HostAllocation, AllocationError>;

    /// Resolve a join code.
    async fn resolve(&self, code: &str) -> Result<JoinAllocation, AllocationError>;
}

/// In-process relay on the loopback interface.
#[derive(Default)]
pub struct LoopbackRelay {
    allocations: Mutex<BTreeMap<String, HostAllocation>>,
}

impl LoopbackRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[async_trait]
impl RelayAllocator for LoopbackRelay {
    async fn allocate(&self, capacity: u32) -> Result<HostAllocation, AllocationError> {
        if capacity == 0 {
            return Err(AllocationError::Service("capacity must be positive".into()));
        }

        // Reserve a free port by binding and releasing it
        let probe = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| AllocationError::Service(e.to_string()))?;
        let port = probe
            .local_addr()
            .map_err(|e| AllocationError::Service(e.to_string()))?
            .port();
        drop(probe);

        let mut allocations = self.allocations.lock().await;
        let join_code = loop {
            let code = random_code(RELAY_CODE_LEN);
            if !allocations.contains_key(&code) {
                break code;
            }
        };

        let allocation = HostAllocation {
            allocation_id: uuid::Uuid::new_v4().to_string(),
            join_code: join_code.clone(),
            endpoint: RelayEndpoint {
                address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
            },
            key: hex::encode(random_bytes(16)),
            connection_data: random_bytes(16),
        };
        info!(code = %join_code, port, "relay allocated");
        allocations.insert(join_code, allocation.clone());
        Ok(allocation)
    }

    async fn resolve(&self, code: &str) -> Result<JoinAllocation, AllocationError> {
        let allocations = self.allocations.lock().await;
        let host = allocations
            .get(&code.to_ascii_uppercase())
            .ok_or(AllocationError::NotFound)?;
        debug!(code, "relay code resolved");
        Ok(JoinAllocation {
            endpoint: host.endpoint,
            key: host.key.clone(),
            connection_data: random_bytes(16),
            host_connection_data: host.connection_data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocate_then_resolve() {
        let relay = LoopbackRelay::new();
        let host = relay.allocate(2).await.unwrap();
        assert!(host.endpoint.address.is_loopback());
        assert_eq!(hex::decode(&host.key).unwrap().len(), 16);

        let join = relay.resolve(&host.join_code).await.unwrap();
        assert_eq!(join.endpoint, host.endpoint);
        assert_eq!(join.key, host.key);
        assert_eq!(join.host_connection_data, host.connection_data);
        assert_eq!(join.endpoint.url(), format!("ws://127.0.0.1:{}", host.endpoint.port));
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let relay = LoopbackRelay::new();
        assert_eq!(relay.resolve("ZZZZZZ").await, Err(AllocationError::NotFound));
        assert!(matches!(relay.allocate(0).await, Err(AllocationError::Service(_))));
    }
}
