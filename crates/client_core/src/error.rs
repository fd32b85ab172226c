use game::GameError;
use shared::domain::MatchId;
use thiserror::Error;

use crate::presentation::AudioBlocked;

/// Failures reported by a [`crate::store::MatchStore`] or
/// [`crate::store::StatsStore`]. A failed precondition is not an error; it
/// comes back as [`crate::store::UpdateResult::Conflict`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("match store unavailable: {0}")]
    Unavailable(String),
    #[error("match {0} not found")]
    MatchNotFound(MatchId),
    #[error("store rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayError {
    #[error("cell {index} cannot be played")]
    InvalidMove { index: usize },
    #[error("not your turn")]
    NotYourTurn,
    #[error("match store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("audio playback blocked")]
    AudioBlocked,
    #[error("match {0} not found")]
    MatchNotFound(MatchId),
    #[error("no match in progress")]
    NoActiveMatch,
    #[error("store rejected the request: {0}")]
    Rejected(String),
}

impl From<GameError> for PlayError {
    fn from(err: GameError) -> Self {
        PlayError::InvalidMove { index: err.index() }
    }
}

impl From<StoreError> for PlayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => PlayError::StoreUnavailable(reason),
            StoreError::MatchNotFound(match_id) => PlayError::MatchNotFound(match_id),
            StoreError::Rejected(reason) => PlayError::Rejected(reason),
        }
    }
}

impl From<AudioBlocked> for PlayError {
    fn from(_: AudioBlocked) -> Self {
        PlayError::AudioBlocked
    }
}
