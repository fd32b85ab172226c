use std::fmt;

use chrono::{DateTime, Utc};
use game::{Board, Mark, Outcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(MatchId);

/// Opaque player identity, e.g. an anonymous uid handed out per install.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    Active,
    Finished,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::Active => "active",
            MatchStatus::Finished => "finished",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "waiting" => Some(MatchStatus::Waiting),
            "active" => Some(MatchStatus::Active),
            "finished" => Some(MatchStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    X,
    O,
    Draw,
    #[default]
    None,
}

impl Winner {
    pub fn as_str(self) -> &'static str {
        match self {
            Winner::X => "x",
            Winner::O => "o",
            Winner::Draw => "draw",
            Winner::None => "none",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "x" => Some(Winner::X),
            "o" => Some(Winner::O),
            "draw" => Some(Winner::Draw),
            "none" => Some(Winner::None),
            _ => None,
        }
    }

    pub fn from_mark(mark: Mark) -> Self {
        match mark {
            Mark::X => Winner::X,
            Mark::O => Winner::O,
        }
    }
}

impl From<Outcome> for Winner {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Win(mark) => Winner::from_mark(mark),
            Outcome::Draw => Winner::Draw,
            Outcome::InProgress => Winner::None,
        }
    }
}

/// Shared record of one online match as held by the match store.
///
/// `version` is bumped by every accepted write and is what conditional
/// updates compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDocument {
    pub id: MatchId,
    pub player_x: Option<PlayerId>,
    pub player_o: Option<PlayerId>,
    pub board: Board,
    pub turn: Mark,
    pub status: MatchStatus,
    #[serde(default)]
    pub winner: Winner,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchDocument {
    pub fn new_waiting(id: MatchId, player_x: PlayerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            player_x: Some(player_x),
            player_o: None,
            board: Board::new(),
            turn: Mark::X,
            status: MatchStatus::Waiting,
            winner: Winner::None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_of(&self, player: &PlayerId) -> Option<Mark> {
        if self.player_x.as_ref() == Some(player) {
            Some(Mark::X)
        } else if self.player_o.as_ref() == Some(player) {
            Some(Mark::O)
        } else {
            None
        }
    }

    pub fn player_for(&self, mark: Mark) -> Option<&PlayerId> {
        match mark {
            Mark::X => self.player_x.as_ref(),
            Mark::O => self.player_o.as_ref(),
        }
    }

    /// The stat each seated player earns from the recorded winner. Empty
    /// while no result has been recorded.
    pub fn results(&self) -> Vec<(PlayerId, StatKind)> {
        let results = match self.winner {
            Winner::X => [(Mark::X, StatKind::Wins), (Mark::O, StatKind::Losses)],
            Winner::O => [(Mark::O, StatKind::Wins), (Mark::X, StatKind::Losses)],
            Winner::Draw => [(Mark::X, StatKind::Draws), (Mark::O, StatKind::Draws)],
            Winner::None => return Vec::new(),
        };
        results
            .into_iter()
            .filter_map(|(mark, stat)| self.player_for(mark).map(|player| (player.clone(), stat)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    Wins,
    Losses,
    Draws,
}

impl StatKind {
    pub fn column(self) -> &'static str {
        match self {
            StatKind::Wins => "wins",
            StatKind::Losses => "losses",
            StatKind::Draws => "draws",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
}

impl PlayerStats {
    /// Counters for a player whose first finished game ended with `kind`.
    pub fn first(kind: StatKind) -> Self {
        let mut stats = Self::default();
        stats.increment(kind);
        stats
    }

    pub fn increment(&mut self, kind: StatKind) {
        match kind {
            StatKind::Wins => self.wins += 1,
            StatKind::Losses => self.losses += 1,
            StatKind::Draws => self.draws += 1,
        }
    }

    pub fn get(&self, kind: StatKind) -> u64 {
        match kind {
            StatKind::Wins => self.wins,
            StatKind::Losses => self.losses,
            StatKind::Draws => self.draws,
        }
    }

    pub fn games(&self) -> u64 {
        self.wins + self.losses + self.draws
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub stats: PlayerStats,
}
