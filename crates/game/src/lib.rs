//! Board model and heuristic AI for 3x3 tic-tac-toe.

pub mod ai;
pub mod board;
pub mod error;

pub use ai::choose_move;
pub use board::{Board, Cell, Mark, Outcome, BOARD_CELLS, CENTER, CORNERS, WINNING_LINES};
pub use error::GameError;
