//! Game Logic Module
//!
//! The authoritative turn state machine and the events it emits.
//! No I/O lives here; the network layer decides who may call it.
//!
//! ## Module Structure
//!
//! - `state`: Player ids, phase, scores, snapshots
//! - `turn`: Move validation, win/tie detection, rematch
//! - `events`: Notifications for observers

pub mod state;
pub mod turn;
pub mod events;

// Re-export key types
pub use state::{Phase, PlayerId, Scores, TurnSnapshot};
pub use turn::{TurnResult, TurnStateMachine};
pub use events::GameEvent;
