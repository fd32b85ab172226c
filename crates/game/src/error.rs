use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("invalid move: index {index} is outside the board")]
    OutOfRange { index: usize },
    #[error("invalid move: cell {index} is already occupied")]
    Occupied { index: usize },
}

impl GameError {
    pub fn index(&self) -> usize {
        match self {
            GameError::OutOfRange { index } | GameError::Occupied { index } => *index,
        }
    }
}
