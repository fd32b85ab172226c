use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GameError;

pub const BOARD_CELLS: usize = 9;
pub const CENTER: usize = 4;
pub const CORNERS: [usize; 4] = [0, 2, 6, 8];

/// Rows, columns, then diagonals.
pub const WINNING_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn opponent(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Mark::X => 'X',
            Mark::O => 'O',
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// `None` is an empty cell. Serializes as `null` next to `"X"`/`"O"`.
pub type Cell = Option<Mark>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    InProgress,
    Win(Mark),
    Draw,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Outcome::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    cells: [Cell; BOARD_CELLS],
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a board from a snapshot, e.g. one received from the match store.
    pub fn from_cells(cells: [Cell; BOARD_CELLS]) -> Self {
        Self { cells }
    }

    pub fn to_cells(&self) -> [Cell; BOARD_CELLS] {
        self.cells
    }

    pub fn cells(&self) -> &[Cell; BOARD_CELLS] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<Cell> {
        self.cells.get(index).copied()
    }

    pub fn is_empty_at(&self, index: usize) -> bool {
        matches!(self.cell(index), Some(None))
    }

    pub fn apply_move(&mut self, index: usize, mark: Mark) -> Result<(), GameError> {
        let slot = self
            .cells
            .get_mut(index)
            .ok_or(GameError::OutOfRange { index })?;
        if slot.is_some() {
            return Err(GameError::Occupied { index });
        }
        *slot = Some(mark);
        Ok(())
    }

    pub fn detect_outcome(&self) -> Outcome {
        for line in &WINNING_LINES {
            if let Some(mark) = self.line_owner(line) {
                return Outcome::Win(mark);
            }
        }
        if self.is_full() {
            Outcome::Draw
        } else {
            Outcome::InProgress
        }
    }

    pub fn reset(&mut self) {
        self.cells = [None; BOARD_CELLS];
    }

    pub fn empty_cells(&self) -> Vec<usize> {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| cell.is_none().then_some(index))
            .collect()
    }

    pub fn count(&self, mark: Mark) -> usize {
        self.cells.iter().filter(|cell| **cell == Some(mark)).count()
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    /// X moves whenever both marks have been played equally often.
    pub fn next_mark(&self) -> Mark {
        if self.count(Mark::X) > self.count(Mark::O) {
            Mark::O
        } else {
            Mark::X
        }
    }

    /// Holds after every legal move of an X-first game.
    pub fn has_valid_turn_balance(&self) -> bool {
        let x = self.count(Mark::X);
        let o = self.count(Mark::O);
        x == o || x == o + 1
    }

    fn line_owner(&self, line: &[usize; 3]) -> Option<Mark> {
        let first = self.cells[line[0]]?;
        line[1..]
            .iter()
            .all(|&index| self.cells[index] == Some(first))
            .then_some(first)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, chunk) in self.cells.chunks(3).enumerate() {
            if row > 0 {
                writeln!(f)?;
            }
            for cell in chunk {
                write!(f, "{}", cell.map_or('.', Mark::as_char))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
