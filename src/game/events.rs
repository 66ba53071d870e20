//! Game Events
//!
//! Notifications produced by the turn state machine and fanned out to
//! every observer of the authority.

use serde::{Deserialize, Serialize};

use crate::core::board::{GridPos, Mark};
use crate::core::lines::WinLine;
use crate::game::state::Scores;

/// Authoritative state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEvent {
    /// Both members present, first game begins.
    GameStarted,

    /// A mark was placed.
    CellPlaced {
        x: u8,
        y: u8,
        mark: Mark,
    },

    /// Turn owner changed. `None` once the game is over.
    MoverChanged {
        mover: Option<Mark>,
    },

    /// Score table after a win.
    ScoresChanged {
        scores: Scores,
    },

    /// A line was completed.
    GameWon {
        line: WinLine,
        mark: Mark,
    },

    /// Board full with no completed line.
    GameTied,

    /// Board cleared for another game.
    Rematch,
}

impl GameEvent {
    /// Create cell placed event.
    pub fn cell_placed(pos: GridPos, mark: Mark) -> Self {
        GameEvent::CellPlaced { x: pos.x, y: pos.y, mark }
    }

    /// Create mover changed event.
    pub fn mover_changed(mover: Option<Mark>) -> Self {
        GameEvent::MoverChanged { mover }
    }

    /// Create game won event.
    pub fn game_won(line: WinLine, mark: Mark) -> Self {
        GameEvent::GameWon { line, mark }
    }

    /// Whether re-applying this event is harmless.
    ///
    /// Mover and score events carry absolute values; everything else is a
    /// point-in-time notification that must be observed once.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, GameEvent::MoverChanged { .. } | GameEvent::ScoresChanged { .. })
    }

    /// Whether this event ends a game.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GameEvent::GameWon { .. } | GameEvent::GameTied)
    }
}
