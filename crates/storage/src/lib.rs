use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, SqliteConnection,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{LeaderboardEntry, MatchDocument, MatchId, MatchStatus, PlayerId, PlayerStats, StatKind, Winner},
    protocol::{MatchUpdate, Precondition},
    Board, Mark,
};

/// Upper bound on compare-and-set retries when concurrent writers keep
/// bumping the version between our read and our write.
const MAX_CAS_ATTEMPTS: usize = 16;

const MATCH_COLUMNS: &str =
    "id, player_x, player_o, board, turn, status, winner, version, created_at, updated_at";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredUpdate {
    Applied(MatchDocument),
    /// The precondition did not hold; carries the current document.
    Rejected(MatchDocument),
}

impl StoredUpdate {
    pub fn applied(&self) -> bool {
        matches!(self, StoredUpdate::Applied(_))
    }

    pub fn document(&self) -> &MatchDocument {
        match self {
            StoredUpdate::Applied(document) | StoredUpdate::Rejected(document) => document,
        }
    }

    pub fn into_document(self) -> MatchDocument {
        match self {
            StoredUpdate::Applied(document) | StoredUpdate::Rejected(document) => document,
        }
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_match(&self, player_x: &PlayerId) -> Result<MatchDocument> {
        let now = Utc::now();
        let board = encode_board(&Board::new())?;
        let row = sqlx::query(
            "INSERT INTO matches (player_x, player_o, board, turn, status, winner, version, created_at, updated_at)
             VALUES (?, NULL, ?, 'X', 'waiting', 'none', 1, ?, ?)
             RETURNING id",
        )
        .bind(player_x.as_str())
        .bind(board)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert match")?;
        let id = MatchId(row.get::<i64, _>(0));
        debug!(match_id = id.0, player_x = %player_x, "created waiting match");
        Ok(MatchDocument::new_waiting(id, player_x.clone(), now))
    }

    pub async fn get_match(&self, match_id: MatchId) -> Result<Option<MatchDocument>> {
        let row = sqlx::query(&format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?"))
            .bind(match_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| match_from_row(&r)).transpose()
    }

    /// Oldest waiting matches first, so the longest-waiting player is paired.
    pub async fn list_waiting_matches(&self, limit: u32) -> Result<Vec<MatchDocument>> {
        let rows = sqlx::query(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches
             WHERE status = 'waiting' AND player_o IS NULL
             ORDER BY created_at ASC, id ASC
             LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(match_from_row).collect()
    }

    pub async fn list_matches_by_status(
        &self,
        status: MatchStatus,
        limit: u32,
    ) -> Result<Vec<MatchDocument>> {
        let rows = sqlx::query(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE status = ? ORDER BY id DESC LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(match_from_row).collect()
    }

    /// Applies `update` only if `precondition` holds for the stored document.
    ///
    /// The write itself is guarded by `version = <read version>`, so two
    /// callers racing on the same document can never both succeed against the
    /// same prior state. An update that ends a game credits both players'
    /// statistics in the same transaction. Returns `None` when the match does
    /// not exist.
    pub async fn update_match(
        &self,
        match_id: MatchId,
        update: &MatchUpdate,
        precondition: &Precondition,
    ) -> Result<Option<StoredUpdate>> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let Some(current) = self.get_match(match_id).await? else {
                return Ok(None);
            };
            if !precondition.holds_for(&current) {
                return Ok(Some(StoredUpdate::Rejected(current)));
            }

            let mut next = current.clone();
            update.apply_to(&mut next, Utc::now());

            let mut tx = self.pool.begin().await?;
            let updated = sqlx::query(
                "UPDATE matches
                 SET player_o = ?, board = ?, turn = ?, status = ?, winner = ?, version = ?, updated_at = ?
                 WHERE id = ? AND version = ?",
            )
            .bind(next.player_o.as_ref().map(PlayerId::as_str))
            .bind(encode_board(&next.board)?)
            .bind(encode_mark(next.turn))
            .bind(next.status.as_str())
            .bind(next.winner.as_str())
            .bind(version_to_db(next.version)?)
            .bind(next.updated_at)
            .bind(match_id.0)
            .bind(version_to_db(current.version)?)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated > 0 {
                if update.ends_game(&current) {
                    for (player_id, stat) in next.results() {
                        bump_stat(&mut tx, &player_id, stat).await?;
                    }
                    debug!(match_id = match_id.0, winner = next.winner.as_str(), "credited game result");
                }
                tx.commit().await?;
                return Ok(Some(StoredUpdate::Applied(next)));
            }
            tx.rollback().await?;
            debug!(
                match_id = match_id.0,
                attempt = attempt + 1,
                "match version moved during conditional update; re-reading"
            );
        }

        Err(anyhow!(
            "match {} kept changing; gave up after {MAX_CAS_ATTEMPTS} attempts",
            match_id.0
        ))
    }

    pub async fn load_stats(&self, player_id: &PlayerId) -> Result<Option<PlayerStats>> {
        let row = sqlx::query("SELECT wins, losses, draws FROM player_stats WHERE player_id = ?")
            .bind(player_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| stats_from_row(&r)).transpose()
    }

    /// Returns `false` if the player already has counters.
    pub async fn create_stats(&self, player_id: &PlayerId, initial: PlayerStats) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO player_stats (player_id, wins, losses, draws)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(player_id) DO NOTHING",
        )
        .bind(player_id.as_str())
        .bind(counter_to_db(initial.wins)?)
        .bind(counter_to_db(initial.losses)?)
        .bind(counter_to_db(initial.draws)?)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    /// Adds one to a single counter, creating zeroed counters first if needed.
    pub async fn increment_stat(&self, player_id: &PlayerId, stat: StatKind) -> Result<PlayerStats> {
        let mut tx = self.pool.begin().await?;
        let stats = bump_stat(&mut tx, player_id, stat).await?;
        tx.commit().await?;
        Ok(stats)
    }

    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>> {
        let rows = sqlx::query(
            "SELECT player_id, wins, losses, draws FROM player_stats
             ORDER BY wins DESC, draws DESC, losses ASC, player_id ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(LeaderboardEntry {
                    player_id: PlayerId::new(r.get::<String, _>(0)),
                    stats: PlayerStats {
                        wins: counter_from_db(r.get::<i64, _>(1))?,
                        losses: counter_from_db(r.get::<i64, _>(2))?,
                        draws: counter_from_db(r.get::<i64, _>(3))?,
                    },
                })
            })
            .collect()
    }
}

async fn bump_stat(
    conn: &mut SqliteConnection,
    player_id: &PlayerId,
    stat: StatKind,
) -> Result<PlayerStats> {
    sqlx::query(
        "INSERT INTO player_stats (player_id, wins, losses, draws)
         VALUES (?, 0, 0, 0)
         ON CONFLICT(player_id) DO NOTHING",
    )
    .bind(player_id.as_str())
    .execute(&mut *conn)
    .await?;

    let column = stat.column();
    let row = sqlx::query(&format!(
        "UPDATE player_stats
         SET {column} = {column} + 1, updated_at = CURRENT_TIMESTAMP
         WHERE player_id = ?
         RETURNING wins, losses, draws"
    ))
    .bind(player_id.as_str())
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to increment {column} for player {player_id}"))?;

    stats_from_row(&row)
}

fn match_from_row(row: &SqliteRow) -> Result<MatchDocument> {
    let id = MatchId(row.try_get::<i64, _>("id")?);
    let raw_status: String = row.try_get("status")?;
    let raw_winner: String = row.try_get("winner")?;
    let raw_turn: String = row.try_get("turn")?;
    let raw_board: String = row.try_get("board")?;
    let version: i64 = row.try_get("version")?;

    Ok(MatchDocument {
        id,
        player_x: row.try_get::<Option<String>, _>("player_x")?.map(PlayerId),
        player_o: row.try_get::<Option<String>, _>("player_o")?.map(PlayerId),
        board: serde_json::from_str(&raw_board)
            .with_context(|| format!("corrupt board for match {}", id.0))?,
        turn: decode_mark(&raw_turn)
            .ok_or_else(|| anyhow!("corrupt turn '{raw_turn}' for match {}", id.0))?,
        status: MatchStatus::parse(&raw_status)
            .ok_or_else(|| anyhow!("corrupt status '{raw_status}' for match {}", id.0))?,
        winner: Winner::parse(&raw_winner)
            .ok_or_else(|| anyhow!("corrupt winner '{raw_winner}' for match {}", id.0))?,
        version: u64::try_from(version).context("negative match version")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn stats_from_row(row: &SqliteRow) -> Result<PlayerStats> {
    Ok(PlayerStats {
        wins: counter_from_db(row.try_get::<i64, _>("wins")?)?,
        losses: counter_from_db(row.try_get::<i64, _>("losses")?)?,
        draws: counter_from_db(row.try_get::<i64, _>("draws")?)?,
    })
}

fn encode_board(board: &Board) -> Result<String> {
    serde_json::to_string(board).context("failed to encode board")
}

fn encode_mark(mark: Mark) -> &'static str {
    match mark {
        Mark::X => "X",
        Mark::O => "O",
    }
}

fn decode_mark(raw: &str) -> Option<Mark> {
    match raw {
        "X" => Some(Mark::X),
        "O" => Some(Mark::O),
        _ => None,
    }
}

fn version_to_db(version: u64) -> Result<i64> {
    i64::try_from(version).context("match version overflow")
}

fn counter_to_db(value: u64) -> Result<i64> {
    i64::try_from(value).context("stat counter overflow")
}

fn counter_from_db(value: i64) -> Result<u64> {
    u64::try_from(value).context("negative stat counter")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
