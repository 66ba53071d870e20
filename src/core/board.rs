//! Board Model
//!
//! Fixed 3x3 grid of cell occupancy. Pure data: the board knows nothing
//! about turns or legality, it only records which mark sits where.

use serde::{Deserialize, Serialize};

/// Board width and height.
pub const BOARD_SIZE: usize = 3;

/// Total number of cells.
pub const CELL_COUNT: usize = BOARD_SIZE * BOARD_SIZE;

// =============================================================================
// MARKS
// =============================================================================

/// A player's mark.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Mark {
    /// First mark. Always opens a game.
    Cross = 1,
    /// Second mark.
    Circle = 2,
}

impl Mark {
    /// The mark that moves first after a start or rematch.
    pub const STARTING: Mark = Mark::Cross;

    /// The other mark.
    #[inline]
    pub fn opponent(self) -> Mark {
        match self {
            Mark::Cross => Mark::Circle,
            Mark::Circle => Mark::Cross,
        }
    }
}

/// Occupancy of a single cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cell {
    /// Nothing placed.
    #[default]
    Empty,
    /// Occupied by a mark.
    Marked(Mark),
}

impl Cell {
    /// Mark in this cell, if any.
    #[inline]
    pub fn mark(self) -> Option<Mark> {
        match self {
            Cell::Empty => None,
            Cell::Marked(mark) => Some(mark),
        }
    }

    /// Check if the cell is empty.
    #[inline]
    pub fn is_empty(self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Stable byte encoding (0 = empty, otherwise the mark discriminant).
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            Cell::Empty => 0,
            Cell::Marked(mark) => mark as u8,
        }
    }
}

// =============================================================================
// GRID POSITION
// =============================================================================

/// A (column, row) coordinate on the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridPos {
    /// Column, 0..3.
    pub x: u8,
    /// Row, 0..3.
    pub y: u8,
}

impl GridPos {
    /// Create a position without bounds checking.
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Create a position, rejecting coordinates off the board.
    pub fn checked(x: u8, y: u8) -> Option<Self> {
        if (x as usize) < BOARD_SIZE && (y as usize) < BOARD_SIZE {
            Some(Self { x, y })
        } else {
            None
        }
    }

    #[inline]
    fn index(self) -> usize {
        self.x as usize * BOARD_SIZE + self.y as usize
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// The 3x3 grid.
///
/// Every cell holds exactly one [`Cell`]; a cell only goes back to
/// [`Cell::Empty`] through [`Board::clear`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Board {
    cells: [Cell; CELL_COUNT],
}

impl Board {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a cell.
    #[inline]
    pub fn get(&self, pos: GridPos) -> Cell {
        self.cells[pos.index()]
    }

    /// Write a cell.
    #[inline]
    pub fn set(&mut self, pos: GridPos, cell: Cell) {
        self.cells[pos.index()] = cell;
    }

    /// Reset every cell to empty.
    pub fn clear(&mut self) {
        self.cells = [Cell::Empty; CELL_COUNT];
    }

    /// Check if no cell is empty.
    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|c| !c.is_empty())
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    /// Iterate all positions in column-major order.
    pub fn positions() -> impl Iterator<Item = GridPos> {
        (0..BOARD_SIZE as u8).flat_map(|x| (0..BOARD_SIZE as u8).map(move |y| GridPos::new(x, y)))
    }

    /// Raw cells in column-major order.
    pub fn cells(&self) -> &[Cell; CELL_COUNT] {
        &self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_board_is_empty() {
        let board = Board::new();
        assert_eq!(board.occupied(), 0);
        assert!(!board.is_full());
        assert!(Board::positions().all(|p| board.get(p).is_empty()));
    }

    #[test]
    fn test_set_and_clear() {
        let mut board = Board::new();
        let pos = GridPos::new(2, 1);
        board.set(pos, Cell::Marked(Mark::Circle));
        assert_eq!(board.get(pos).mark(), Some(Mark::Circle));
        assert_eq!(board.get(GridPos::new(1, 2)), Cell::Empty);

        board.clear();
        assert_eq!(board.occupied(), 0);
    }

    #[test]
    fn test_checked_bounds() {
        assert!(GridPos::checked(2, 2).is_some());
        assert!(GridPos::checked(3, 0).is_none());
        assert!(GridPos::checked(0, 3).is_none());
    }

    #[test]
    fn test_positions_cover_board() {
        assert_eq!(Board::positions().count(), CELL_COUNT);
    }

    #[test]
    fn test_opponent() {
        assert_eq!(Mark::Cross.opponent(), Mark::Circle);
        assert_eq!(Mark::Circle.opponent(), Mark::Cross);
        assert_eq!(Mark::STARTING, Mark::Cross);
    }
}
