//! Network Layer
//!
//! Authority hosting, replication and the participant client.
//! All mutation of turn state is funneled through `authority`.

pub mod authority;
pub mod client;
pub mod identity;
pub mod protocol;
pub mod replication;
pub mod server;

pub use authority::{Authority, AuthorityConfig, AuthorityError, AuthorityHandle, Command, Origin, Role};
pub use client::{ClientError, ClientEvent, ParticipantClient};
pub use identity::{IdentityConfig, IdentityError, LocalIdentity};
pub use protocol::{ClientMessage, ErrorCode, HelloRequest, ServerMessage, WelcomeInfo};
pub use replication::{Envelope, EventDeduper, ObserveError, Observer, Replica, ReplicationChannel, Seq, Snapshot};
pub use server::{AuthorityServer, HostError};
