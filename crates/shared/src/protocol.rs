use chrono::{DateTime, Utc};
use game::{Board, Mark};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{MatchDocument, MatchId, MatchStatus, PlayerId, StatKind, Winner},
    error::ApiError,
};

/// Partial write to a match document. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_o: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<Board>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<Mark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MatchStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
}

impl MatchUpdate {
    pub fn claim(player_o: PlayerId) -> Self {
        Self {
            player_o: Some(player_o),
            status: Some(MatchStatus::Active),
            ..Self::default()
        }
    }

    pub fn play(board: Board, turn: Mark) -> Self {
        Self {
            board: Some(board),
            turn: Some(turn),
            ..Self::default()
        }
    }

    pub fn finish(winner: Winner) -> Self {
        Self {
            status: Some(MatchStatus::Finished),
            winner: Some(winner),
            ..Self::default()
        }
    }

    pub fn restart() -> Self {
        Self {
            board: Some(Board::new()),
            turn: Some(Mark::X),
            status: Some(MatchStatus::Active),
            winner: Some(Winner::None),
            ..Self::default()
        }
    }

    /// Whether applying this to `current` ends a game. Stores credit both
    /// players' statistics in the same write as that transition.
    pub fn ends_game(&self, current: &MatchDocument) -> bool {
        self.status == Some(MatchStatus::Finished) && current.status != MatchStatus::Finished
    }

    /// Writes the present fields into `document` and bumps its version.
    pub fn apply_to(&self, document: &mut MatchDocument, now: DateTime<Utc>) {
        if let Some(player_o) = &self.player_o {
            document.player_o = Some(player_o.clone());
        }
        if let Some(board) = self.board {
            document.board = board;
        }
        if let Some(turn) = self.turn {
            document.turn = turn;
        }
        if let Some(status) = self.status {
            document.status = status;
        }
        if let Some(winner) = self.winner {
            document.winner = winner;
        }
        document.version += 1;
        document.updated_at = now;
    }
}

/// Conditions the stored document must satisfy for an update to be applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MatchStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default)]
    pub player_o_vacant: bool,
}

impl Precondition {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn status(status: MatchStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn version(version: u64) -> Self {
        Self {
            version: Some(version),
            ..Self::default()
        }
    }

    /// Only a still-waiting match with no second player may be claimed.
    pub fn claimable() -> Self {
        Self {
            status: Some(MatchStatus::Waiting),
            player_o_vacant: true,
            ..Self::default()
        }
    }

    pub fn and_status(mut self, status: MatchStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn holds_for(&self, document: &MatchDocument) -> bool {
        if let Some(status) = self.status {
            if document.status != status {
                return false;
            }
        }
        if let Some(version) = self.version {
            if document.version != version {
                return false;
            }
        }
        !(self.player_o_vacant && document.player_o.is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMatchRequest {
    pub player_x: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMatchRequest {
    pub update: MatchUpdate,
    #[serde(default)]
    pub precondition: Precondition,
}

/// `applied == false` means the precondition failed; `document` is then the
/// current stored state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMatchResponse {
    pub applied: bool,
    pub document: MatchDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementStatRequest {
    pub stat: StatKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MatchUpdated { document: MatchDocument },
    Error(ApiError),
}

impl ServerEvent {
    pub fn match_id(&self) -> Option<MatchId> {
        match self {
            ServerEvent::MatchUpdated { document } => Some(document.id),
            ServerEvent::Error(_) => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
