//! Lobby Layer
//!
//! Rendezvous and session lifecycle ahead of the game transport.
//!
//! ## Module Structure
//!
//! - `record`: Session record and member types
//! - `directory`: Directory trait and the timeout-bounded client
//! - `memory`: In-process directory
//! - `poller`: Heartbeat/poll loop, host migration, ready-code detection
//! - `relay`: Relay allocation trait and the loopback allocator
//! - `bootstrap`: Turns a ready session into an authority or participant

pub mod bootstrap;
pub mod directory;
pub mod memory;
pub mod poller;
pub mod record;
pub mod relay;

pub use bootstrap::{BootstrapError, HostSession, JoinedSession, TransportBootstrap};
pub use directory::{DirectoryClient, DirectoryError, SessionDirectory};
pub use memory::InMemoryDirectory;
pub use poller::{LifecyclePoller, LobbyEvent, PollStep, PollerExit};
pub use record::{Member, SessionId, SessionRecord};
pub use relay::{AllocationError, HostAllocation, JoinAllocation, LoopbackRelay, RelayAllocator, RelayEndpoint};

use rand::Rng;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Random short code from an unambiguous alphabet.
pub(crate) fn random_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
