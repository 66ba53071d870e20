//! Core board primitives.
//!
//! Pure data with no I/O: the grid, the static win-line catalog and the
//! digest helpers shared by the game and network layers.

pub mod board;
pub mod lines;
pub mod hash;

// Re-export core types
pub use board::{Board, Cell, GridPos, Mark, BOARD_SIZE};
pub use lines::{find_winner, Orientation, WinLine, WIN_LINES};
pub use hash::{StateHash, StateHasher};
