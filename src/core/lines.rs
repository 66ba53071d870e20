//! Win-Line Catalog
//!
//! The eight winning triples. The catalog order is also the reporting
//! order: detection returns the first completed line.

use serde::{Deserialize, Serialize};

use super::board::{Board, Cell, GridPos, Mark};

/// Direction of a win line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// A row.
    Horizontal,
    /// A column.
    Vertical,
    /// (0,0) to (2,2).
    DiagonalA,
    /// (0,2) to (2,0).
    DiagonalB,
}

/// A winning triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WinLine {
    /// Position of this line in [`WIN_LINES`].
    pub index: u8,
    /// The three cells, in order.
    pub cells: [GridPos; 3],
    /// Cell used to report the winning mark.
    pub center: GridPos,
    /// Direction tag.
    pub orientation: Orientation,
}

const fn line(index: u8, cells: [(u8, u8); 3], center: (u8, u8), orientation: Orientation) -> WinLine {
    WinLine {
        index,
        cells: [
            GridPos::new(cells[0].0, cells[0].1),
            GridPos::new(cells[1].0, cells[1].1),
            GridPos::new(cells[2].0, cells[2].1),
        ],
        center: GridPos::new(center.0, center.1),
        orientation,
    }
}

/// Static catalog, rows then columns then diagonals.
pub const WIN_LINES: [WinLine; 8] = [
    line(0, [(0, 0), (1, 0), (2, 0)], (1, 0), Orientation::Horizontal),
    line(1, [(0, 1), (1, 1), (2, 1)], (1, 1), Orientation::Horizontal),
    line(2, [(0, 2), (1, 2), (2, 2)], (1, 2), Orientation::Horizontal),
    line(3, [(0, 0), (0, 1), (0, 2)], (0, 1), Orientation::Vertical),
    line(4, [(1, 0), (1, 1), (1, 2)], (1, 1), Orientation::Vertical),
    line(5, [(2, 0), (2, 1), (2, 2)], (2, 1), Orientation::Vertical),
    line(6, [(0, 0), (1, 1), (2, 2)], (1, 1), Orientation::DiagonalA),
    line(7, [(0, 2), (1, 1), (2, 0)], (1, 1), Orientation::DiagonalB),
];

impl WinLine {
    /// Look up a line by catalog index.
    pub fn by_index(index: u8) -> Option<&'static WinLine> {
        WIN_LINES.get(index as usize)
    }

    /// Check if all three cells hold the same mark.
    pub fn is_complete(&self, board: &Board) -> bool {
        let [a, b, c] = self.cells.map(|p| board.get(p));
        a != Cell::Empty && a == b && b == c
    }

    /// Check whether the line passes through a position.
    pub fn contains(&self, pos: GridPos) -> bool {
        self.cells.contains(&pos)
    }
}

/// First completed line in catalog order, with the mark at its center.
pub fn find_winner(board: &Board) -> Option<(&'static WinLine, Mark)> {
    WIN_LINES
        .iter()
        .find(|line| line.is_complete(board))
        .and_then(|line| board.get(line.center).mark().map(|mark| (line, mark)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with(cells: &[(u8, u8)], mark: Mark) -> Board {
        let mut board = Board::new();
        for &(x, y) in cells {
            board.set(GridPos::new(x, y), Cell::Marked(mark));
        }
        board
    }

    #[test]
    fn test_catalog_has_eight_lines() {
        assert_eq!(WIN_LINES.len(), 8);
        for (i, line) in WIN_LINES.iter().enumerate() {
            assert_eq!(line.index as usize, i);
            assert!(line.contains(line.center));
        }
    }

    #[test]
    fn test_every_cell_in_at_least_two_lines() {
        for pos in Board::positions() {
            let count = WIN_LINES.iter().filter(|l| l.contains(pos)).count();
            assert!(count >= 2, "{:?} only in {} lines", pos, count);
        }
    }

    #[test]
    fn test_center_in_four_lines() {
        let center = GridPos::new(1, 1);
        let lines: Vec<_> = WIN_LINES.iter().filter(|l| l.contains(center)).collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.iter().filter(|l| l.orientation == Orientation::Horizontal).count(), 1);
        assert_eq!(lines.iter().filter(|l| l.orientation == Orientation::Vertical).count(), 1);
        assert!(lines.iter().any(|l| l.orientation == Orientation::DiagonalA));
        assert!(lines.iter().any(|l| l.orientation == Orientation::DiagonalB));
    }

    #[test]
    fn test_no_winner_on_empty_board() {
        assert!(find_winner(&Board::new()).is_none());
    }

    #[test]
    fn test_top_row_winner() {
        let board = board_with(&[(0, 0), (1, 0), (2, 0)], Mark::Cross);
        let (line, mark) = find_winner(&board).unwrap();
        assert_eq!(line.index, 0);
        assert_eq!(line.orientation, Orientation::Horizontal);
        assert_eq!(line.center, GridPos::new(1, 0));
        assert_eq!(mark, Mark::Cross);
    }

    #[test]
    fn test_anti_diagonal_winner() {
        let board = board_with(&[(0, 2), (1, 1), (2, 0)], Mark::Circle);
        let (line, mark) = find_winner(&board).unwrap();
        assert_eq!(line.orientation, Orientation::DiagonalB);
        assert_eq!(mark, Mark::Circle);
    }

    #[test]
    fn test_mixed_line_is_not_complete() {
        let mut board = board_with(&[(0, 0), (1, 0)], Mark::Cross);
        board.set(GridPos::new(2, 0), Cell::Marked(Mark::Circle));
        assert!(!WIN_LINES[0].is_complete(&board));
    }

    #[test]
    fn test_by_index() {
        assert_eq!(WinLine::by_index(7).map(|l| l.orientation), Some(Orientation::DiagonalB));
        assert!(WinLine::by_index(8).is_none());
    }
}
