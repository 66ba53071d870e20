//! # Tic-Tac-Toe Relay
//!
//! Authoritative two-player tic-tac-toe sessions coordinated through a
//! lobby directory and carried over a relayed WebSocket transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TICTACTOE RELAY                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/              - Board primitives                       │
//! │  ├── board.rs       - 3x3 grid, marks, positions             │
//! │  ├── lines.rs       - Static win-line catalog                │
//! │  └── hash.rs        - Snapshot digests                       │
//! │                                                              │
//! │  game/              - Turn logic (no I/O)                    │
//! │  ├── state.rs       - Player ids, phase, scores, snapshots   │
//! │  ├── turn.rs        - Authoritative turn state machine       │
//! │  └── events.rs      - Events fanned out to observers         │
//! │                                                              │
//! │  network/           - Authority and participant transport    │
//! │  ├── authority.rs   - Role-gated command queue               │
//! │  ├── replication.rs - Sequenced fan-out, dedup, replicas     │
//! │  ├── server.rs      - WebSocket host                         │
//! │  ├── client.rs      - WebSocket participant                  │
//! │  ├── protocol.rs    - Message types                          │
//! │  └── identity.rs    - Local identity, token validation       │
//! │                                                              │
//! │  lobby/             - Rendezvous and lifecycle               │
//! │  ├── directory.rs   - Directory protocol and client          │
//! │  ├── poller.rs      - Heartbeat/poll loop                    │
//! │  ├── relay.rs       - Relay allocation protocol              │
//! │  ├── bootstrap.rs   - Ready session to running transport     │
//! │  ├── memory.rs      - In-process directory                   │
//! │  └── record.rs      - Session record                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trust Boundary
//!
//! Only the authority mutates turn state, through one command queue.
//! A participant's requests arrive as peer-origin commands bound to the
//! mark it was assigned at connect time. Every observer, the authority's
//! own view included, follows the same sequenced event stream.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod lobby;
pub mod network;

// Re-export commonly used types
pub use config::{HostConfig, LobbyConfig, SESSION_CAPACITY};
pub use crate::core::board::{Board, Cell, GridPos, Mark};
pub use crate::core::lines::{WinLine, WIN_LINES};
pub use game::events::GameEvent;
pub use game::state::{Phase, PlayerId, Scores, TurnSnapshot};
pub use game::turn::TurnStateMachine;
pub use lobby::{DirectoryClient, InMemoryDirectory, LifecyclePoller, LoopbackRelay, TransportBootstrap};
pub use network::{AuthorityHandle, LocalIdentity, ParticipantClient, Role};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
