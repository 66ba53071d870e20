//! Turn State Definitions
//!
//! Phase, scores and the pull-able snapshot of authoritative state.

use serde::{Deserialize, Serialize};

use crate::core::board::{Board, Mark};
use crate::core::hash::{StateHash, StateHasher};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create a random identifier.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

// =============================================================================
// PHASE & SCORES
// =============================================================================

/// Turn state machine phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
#[derive(Default)]
pub enum Phase {
    /// Waiting for the second member.
    #[default]
    Idle = 0,
    /// A game is being played.
    InProgress = 1,
    /// Won or tied, waiting for a rematch.
    Terminal = 2,
}

/// Wins per mark. Persist across rematches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scores {
    /// Wins for [`Mark::Cross`].
    pub cross: u32,
    /// Wins for [`Mark::Circle`].
    pub circle: u32,
}

impl Scores {
    /// Score for one mark.
    pub fn get(&self, mark: Mark) -> u32 {
        match mark {
            Mark::Cross => self.cross,
            Mark::Circle => self.circle,
        }
    }

    /// Record a win.
    pub fn increment(&mut self, mark: Mark) {
        match mark {
            Mark::Cross => self.cross = self.cross.saturating_add(1),
            Mark::Circle => self.circle = self.circle.saturating_add(1),
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Point-in-time copy of the authoritative turn state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSnapshot {
    /// Current phase.
    pub phase: Phase,
    /// Whose turn it is; `None` outside a running game.
    pub mover: Option<Mark>,
    /// Accumulated wins.
    pub scores: Scores,
    /// Board contents.
    pub board: Board,
}

impl TurnSnapshot {
    /// Digest of the snapshot for integrity checks.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_turn_state();
        hasher.update_u8(self.phase as u8);
        hasher.update_u8(self.mover.map(|m| m as u8).unwrap_or(0));
        hasher.update_u32(self.scores.cross);
        hasher.update_u32(self.scores.circle);
        for cell in self.board.cells() {
            hasher.update_u8(cell.as_u8());
        }
        hasher.finalize()
    }
}
