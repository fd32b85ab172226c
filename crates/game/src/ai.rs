//! Rule-based opponent.
//!
//! Rules are tried in order and the first one that yields a cell wins:
//! complete an own line, block the opponent's line, take the center, take a
//! random free corner, take any random free cell. This is a fixed heuristic
//! and can be beaten.

use rand::{seq::SliceRandom, Rng};

use crate::board::{Board, Mark, CENTER, CORNERS, WINNING_LINES};

pub fn choose_move<R: Rng + ?Sized>(board: &Board, ai_mark: Mark, rng: &mut R) -> Option<usize> {
    if let Some(index) = winning_move(board, ai_mark) {
        return Some(index);
    }
    if let Some(index) = winning_move(board, ai_mark.opponent()) {
        return Some(index);
    }
    if board.is_empty_at(CENTER) {
        return Some(CENTER);
    }

    let corners: Vec<usize> = CORNERS
        .iter()
        .copied()
        .filter(|&index| board.is_empty_at(index))
        .collect();
    if let Some(&corner) = corners.choose(rng) {
        return Some(corner);
    }

    board.empty_cells().choose(rng).copied()
}

/// First line (in `WINNING_LINES` order) holding two `mark`s and one empty cell.
pub fn winning_move(board: &Board, mark: Mark) -> Option<usize> {
    WINNING_LINES
        .iter()
        .find_map(|line| completing_cell(board, mark, line))
}

fn completing_cell(board: &Board, mark: Mark, line: &[usize; 3]) -> Option<usize> {
    let mut owned = 0;
    let mut empty = None;
    for &index in line {
        match board.cells()[index] {
            Some(m) if m == mark => owned += 1,
            None if empty.is_none() => empty = Some(index),
            _ => return None,
        }
    }
    if owned == 2 {
        empty
    } else {
        None
    }
}

#[cfg(test)]
#[path = "tests/ai_tests.rs"]
mod tests;
