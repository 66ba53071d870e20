//! Authoritative Turn State Machine
//!
//! Owns the board, the current mover and the score table. Only the
//! authority node drives it; everyone else sees the events it returns.
//!
//! Illegal input never raises. A stale or racing request (wrong mover,
//! occupied cell, game already over) simply produces no events.

use tracing::debug;

use crate::core::board::{Board, Cell, GridPos, Mark};
use crate::core::lines::find_winner;
use crate::game::events::GameEvent;
use crate::game::state::{Phase, Scores, TurnSnapshot};

/// Result of one state machine operation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TurnResult {
    /// Events generated, in broadcast order.
    pub events: Vec<GameEvent>,
}

impl TurnResult {
    /// Whether the operation changed anything.
    pub fn accepted(&self) -> bool {
        !self.events.is_empty()
    }

    fn rejected() -> Self {
        Self::default()
    }
}

/// The authoritative game brain.
#[derive(Clone, Debug, Default)]
pub struct TurnStateMachine {
    board: Board,
    phase: Phase,
    mover: Option<Mark>,
    scores: Scores,
}

impl TurnStateMachine {
    /// Create an idle machine with an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin the first game once both members are present.
    ///
    /// Only valid from [`Phase::Idle`].
    pub fn start(&mut self) -> TurnResult {
        if self.phase != Phase::Idle {
            debug!(phase = ?self.phase, "start ignored");
            return TurnResult::rejected();
        }

        self.phase = Phase::InProgress;
        self.mover = Some(Mark::STARTING);

        TurnResult {
            events: vec![GameEvent::GameStarted, GameEvent::mover_changed(self.mover)],
        }
    }

    /// Place `mark` at `(x, y)`.
    ///
    /// # Arguments
    ///
    /// * `x` - Column, 0..3
    /// * `y` - Row, 0..3
    /// * `mark` - The mark the requester claims to play
    ///
    /// # Ordering
    ///
    /// `CellPlaced` is always emitted before `MoverChanged`, so an observer
    /// never sees the new turn owner without the mark that caused it.
    pub fn apply_move(&mut self, x: u8, y: u8, mark: Mark) -> TurnResult {
        if self.phase != Phase::InProgress {
            debug!(phase = ?self.phase, x, y, ?mark, "move ignored: no game running");
            return TurnResult::rejected();
        }

        if self.mover != Some(mark) {
            debug!(?mark, mover = ?self.mover, "move ignored: not this mark's turn");
            return TurnResult::rejected();
        }

        let Some(pos) = GridPos::checked(x, y) else {
            debug!(x, y, "move ignored: off the board");
            return TurnResult::rejected();
        };

        if !self.board.get(pos).is_empty() {
            debug!(x, y, "move ignored: cell occupied");
            return TurnResult::rejected();
        }

        let mut events = Vec::with_capacity(5);

        self.board.set(pos, Cell::Marked(mark));
        events.push(GameEvent::cell_placed(pos, mark));

        self.mover = Some(mark.opponent());
        events.push(GameEvent::mover_changed(self.mover));

        self.detect_outcome(&mut events);

        TurnResult { events }
    }

    /// Win first, tie only if no line is complete.
    fn detect_outcome(&mut self, events: &mut Vec<GameEvent>) {
        if let Some((line, winner)) = find_winner(&self.board) {
            self.phase = Phase::Terminal;
            self.mover = None;
            events.push(GameEvent::mover_changed(None));

            self.scores.increment(winner);
            events.push(GameEvent::ScoresChanged { scores: self.scores });

            events.push(GameEvent::game_won(*line, winner));
            return;
        }

        if self.board.is_full() {
            self.phase = Phase::Terminal;
            self.mover = None;
            events.push(GameEvent::mover_changed(None));
            events.push(GameEvent::GameTied);
        }
    }

    /// Clear the board and hand the first move back to [`Mark::STARTING`].
    ///
    /// Scores are kept. Accepted from any phase except [`Phase::Idle`].
    pub fn rematch(&mut self) -> TurnResult {
        if self.phase == Phase::Idle {
            debug!("rematch ignored: session not started");
            return TurnResult::rejected();
        }

        self.board.clear();
        self.phase = Phase::InProgress;
        self.mover = Some(Mark::STARTING);

        TurnResult {
            events: vec![GameEvent::Rematch, GameEvent::mover_changed(self.mover)],
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whose turn it is.
    pub fn mover(&self) -> Option<Mark> {
        self.mover
    }

    /// Score table.
    pub fn scores(&self) -> Scores {
        self.scores
    }

    /// Board contents.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Copy of the full state for late joiners.
    pub fn snapshot(&self) -> TurnSnapshot {
        TurnSnapshot {
            phase: self.phase,
            mover: self.mover,
            scores: self.scores,
            board: self.board,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lines::{Orientation, WIN_LINES};
    use proptest::prelude::*;

    fn started() -> TurnStateMachine {
        let mut machine = TurnStateMachine::new();
        machine.start();
        machine
    }

    /// Play moves alternating from the current mover.
    fn play(machine: &mut TurnStateMachine, moves: &[(u8, u8)]) -> Vec<GameEvent> {
        let mut events = Vec::new();
        for &(x, y) in moves {
            let mark = machine.mover().expect("game should be running");
            let result = machine.apply_move(x, y, mark);
            assert!(result.accepted(), "move ({}, {}) rejected", x, y);
            events.extend(result.events);
        }
        events
    }

    fn count(events: &[GameEvent], pred: impl Fn(&GameEvent) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn test_start() {
        let mut machine = TurnStateMachine::new();
        assert_eq!(machine.phase(), Phase::Idle);
        assert_eq!(machine.mover(), None);

        let result = machine.start();
        assert_eq!(
            result.events,
            vec![GameEvent::GameStarted, GameEvent::mover_changed(Some(Mark::Cross))]
        );
        assert_eq!(machine.phase(), Phase::InProgress);

        // Second start is a no-op
        assert!(!machine.start().accepted());
    }

    #[test]
    fn test_move_before_start_ignored() {
        let mut machine = TurnStateMachine::new();
        assert!(!machine.apply_move(0, 0, Mark::Cross).accepted());
        assert_eq!(machine.board().occupied(), 0);
    }

    #[test]
    fn test_cell_placed_before_mover_changed() {
        let mut machine = started();
        let result = machine.apply_move(1, 2, Mark::Cross);
        assert_eq!(
            result.events,
            vec![
                GameEvent::CellPlaced { x: 1, y: 2, mark: Mark::Cross },
                GameEvent::mover_changed(Some(Mark::Circle)),
            ]
        );
    }

    #[test]
    fn test_wrong_mover_ignored() {
        let mut machine = started();
        let before = machine.snapshot();
        assert!(!machine.apply_move(0, 0, Mark::Circle).accepted());
        assert_eq!(machine.snapshot(), before);
    }

    #[test]
    fn test_occupied_cell_ignored() {
        let mut machine = started();
        machine.apply_move(0, 0, Mark::Cross);
        let before = machine.snapshot();
        assert!(!machine.apply_move(0, 0, Mark::Circle).accepted());
        assert_eq!(machine.snapshot(), before);
    }

    #[test]
    fn test_off_board_ignored() {
        let mut machine = started();
        assert!(!machine.apply_move(3, 0, Mark::Cross).accepted());
        assert_eq!(machine.mover(), Some(Mark::Cross));
    }

    #[test]
    fn test_top_row_scenario() {
        let mut machine = started();
        let events = play(&mut machine, &[(0, 0), (1, 1), (1, 0), (1, 2), (2, 0)]);

        let won: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                GameEvent::GameWon { line, mark } => Some((*line, *mark)),
                _ => None,
            })
            .collect();
        assert_eq!(won.len(), 1);
        let (line, mark) = won[0];
        assert_eq!(line, WIN_LINES[0]);
        assert_eq!(line.orientation, Orientation::Horizontal);
        assert_eq!(line.center, GridPos::new(1, 0));
        assert_eq!(mark, Mark::Cross);

        assert_eq!(machine.mover(), None);
        assert_eq!(machine.phase(), Phase::Terminal);
        assert_eq!(machine.scores(), Scores { cross: 1, circle: 0 });
        assert_eq!(count(&events, |e| *e == GameEvent::GameTied), 0);
    }

    #[test]
    fn test_winning_move_event_order() {
        let mut machine = started();
        play(&mut machine, &[(0, 0), (1, 1), (1, 0), (1, 2)]);
        let result = machine.apply_move(2, 0, Mark::Cross);
        assert_eq!(
            result.events,
            vec![
                GameEvent::CellPlaced { x: 2, y: 0, mark: Mark::Cross },
                GameEvent::mover_changed(Some(Mark::Circle)),
                GameEvent::mover_changed(None),
                GameEvent::ScoresChanged { scores: Scores { cross: 1, circle: 0 } },
                GameEvent::game_won(WIN_LINES[0], Mark::Cross),
            ]
        );
    }

    #[test]
    fn test_tie_scenario() {
        // X O X
        // X O O
        // O X X
        let mut machine = started();
        let events = play(
            &mut machine,
            &[(0, 0), (1, 0), (2, 0), (1, 1), (0, 1), (2, 1), (1, 2), (0, 2), (2, 2)],
        );

        assert_eq!(count(&events, |e| *e == GameEvent::GameTied), 1);
        assert_eq!(count(&events, |e| matches!(e, GameEvent::GameWon { .. })), 0);
        assert_eq!(machine.phase(), Phase::Terminal);
        assert_eq!(machine.mover(), None);
        assert_eq!(machine.scores(), Scores::default());
    }

    #[test]
    fn test_full_board_with_line_reports_win() {
        // Ninth move fills the board and completes column 0.
        // X O X
        // X O O
        // X X O
        let mut machine = started();
        let events = play(
            &mut machine,
            &[(0, 0), (1, 0), (2, 0), (1, 1), (1, 2), (2, 1), (0, 2), (2, 2), (0, 1)],
        );

        assert!(machine.board().is_full());
        assert_eq!(count(&events, |e| matches!(e, GameEvent::GameWon { .. })), 1);
        assert_eq!(count(&events, |e| *e == GameEvent::GameTied), 0);
    }

    #[test]
    fn test_moves_after_win_ignored() {
        let mut machine = started();
        play(&mut machine, &[(0, 0), (1, 1), (1, 0), (1, 2), (2, 0)]);
        let before = machine.snapshot();
        assert!(!machine.apply_move(2, 2, Mark::Circle).accepted());
        assert!(!machine.apply_move(2, 2, Mark::Cross).accepted());
        assert_eq!(machine.snapshot(), before);
    }

    #[test]
    fn test_rematch_after_win_keeps_scores() {
        let mut machine = started();
        play(&mut machine, &[(0, 0), (1, 1), (1, 0), (1, 2), (2, 0)]);

        let result = machine.rematch();
        assert_eq!(
            result.events,
            vec![GameEvent::Rematch, GameEvent::mover_changed(Some(Mark::Cross))]
        );
        assert_eq!(machine.board().occupied(), 0);
        assert_eq!(machine.mover(), Some(Mark::Cross));
        assert_eq!(machine.phase(), Phase::InProgress);
        assert_eq!(machine.scores(), Scores { cross: 1, circle: 0 });
    }

    #[test]
    fn test_rematch_after_tie() {
        let mut machine = started();
        play(
            &mut machine,
            &[(0, 0), (1, 0), (2, 0), (1, 1), (0, 1), (2, 1), (1, 2), (0, 2), (2, 2)],
        );
        machine.rematch();
        assert_eq!(machine.mover(), Some(Mark::STARTING));
        assert_eq!(machine.board().occupied(), 0);
    }

    #[test]
    fn test_rematch_mid_game_resets_mover() {
        let mut machine = started();
        play(&mut machine, &[(0, 0)]);
        assert_eq!(machine.mover(), Some(Mark::Circle));
        machine.rematch();
        assert_eq!(machine.mover(), Some(Mark::Cross));
    }

    #[test]
    fn test_rematch_before_start_ignored() {
        let mut machine = TurnStateMachine::new();
        assert!(!machine.rematch().accepted());
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn test_circle_win_scores_circle() {
        let mut machine = started();
        play(&mut machine, &[(0, 0), (2, 0), (0, 1), (1, 1), (2, 2), (0, 2)]);
        assert_eq!(machine.scores(), Scores { cross: 0, circle: 1 });
    }

    proptest! {
        /// Replaying random legal prefixes, every illegal request is a no-op.
        #[test]
        fn prop_illegal_moves_are_noops(
            moves in proptest::collection::vec((0u8..3, 0u8..3), 0..12),
            probe in (0u8..3, 0u8..3),
        ) {
            let mut machine = started();
            for (x, y) in moves {
                if let Some(mark) = machine.mover() {
                    machine.apply_move(x, y, mark);
                }
            }

            let before = machine.snapshot();

            // Wrong mover (or any mover once the game is over)
            let wrong = machine.mover().map(Mark::opponent).unwrap_or(Mark::Cross);
            prop_assert!(!machine.apply_move(probe.0, probe.1, wrong).accepted());
            prop_assert_eq!(machine.snapshot(), before.clone());

            // Occupied cell, right mover
            if let Some(mover) = machine.mover() {
                for pos in Board::positions() {
                    if !machine.board().get(pos).is_empty() {
                        prop_assert!(!machine.apply_move(pos.x, pos.y, mover).accepted());
                    }
                }
            }
            prop_assert_eq!(machine.snapshot(), before);
        }

        /// Scores never decrease across any sequence of moves and rematches.
        #[test]
        fn prop_scores_monotonic(
            steps in proptest::collection::vec(prop_oneof![
                (0u8..3, 0u8..3).prop_map(Some),
                Just(None),
            ], 0..40),
        ) {
            let mut machine = started();
            let mut last = machine.scores();
            for step in steps {
                match step {
                    Some((x, y)) => {
                        if let Some(mark) = machine.mover() {
                            machine.apply_move(x, y, mark);
                        }
                    }
                    None => {
                        machine.rematch();
                    }
                }
                let now = machine.scores();
                prop_assert!(now.cross >= last.cross && now.circle >= last.circle);
                last = now;
            }
        }
    }
}
