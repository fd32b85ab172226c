use shared::{
    domain::{LeaderboardEntry, MatchDocument, MatchId, PlayerId, PlayerStats, StatKind, Winner},
    error::{ApiError, ErrorCode},
    protocol::{MatchUpdate, ServerEvent, UpdateMatchRequest, UpdateMatchResponse},
    Board,
};
use storage::Storage;
use tracing::{debug, info};

pub const MAX_LIST_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn create_match(ctx: &ApiContext, player_x: &PlayerId) -> Result<MatchDocument, ApiError> {
    ensure_player_id(player_x)?;
    let document = ctx.storage.create_match(player_x).await.map_err(internal)?;
    info!(match_id = document.id.0, player_x = %player_x, "match created");
    Ok(document)
}

pub async fn get_match(ctx: &ApiContext, match_id: MatchId) -> Result<MatchDocument, ApiError> {
    ctx.storage
        .get_match(match_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(match_id))
}

pub async fn list_waiting_matches(
    ctx: &ApiContext,
    limit: u32,
) -> Result<Vec<MatchDocument>, ApiError> {
    ctx.storage
        .list_waiting_matches(limit.clamp(1, MAX_LIST_LIMIT))
        .await
        .map_err(internal)
}

/// Conditionally writes to a match. A failed precondition is not an error:
/// the caller gets `applied == false` and the current document.
pub async fn update_match(
    ctx: &ApiContext,
    match_id: MatchId,
    request: &UpdateMatchRequest,
) -> Result<UpdateMatchResponse, ApiError> {
    if let Some(player_o) = &request.update.player_o {
        ensure_player_id(player_o)?;
    }

    let current = get_match(ctx, match_id).await?;
    if !request.precondition.holds_for(&current) {
        debug!(
            match_id = match_id.0,
            version = current.version,
            "match update precondition failed"
        );
        return Ok(UpdateMatchResponse {
            applied: false,
            document: current,
        });
    }
    validate_update(&current, &request.update)?;

    let stored = ctx
        .storage
        .update_match(match_id, &request.update, &request.precondition)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(match_id))?;

    let applied = stored.applied();
    let document = stored.into_document();
    if applied {
        info!(
            match_id = match_id.0,
            version = document.version,
            status = document.status.as_str(),
            "match updated"
        );
    } else {
        debug!(
            match_id = match_id.0,
            version = document.version,
            "match update precondition failed"
        );
    }
    Ok(UpdateMatchResponse { applied, document })
}

pub fn match_updated_event(document: &MatchDocument) -> ServerEvent {
    ServerEvent::MatchUpdated {
        document: document.clone(),
    }
}

pub async fn get_stats(ctx: &ApiContext, player_id: &PlayerId) -> Result<PlayerStats, ApiError> {
    ctx.storage
        .load_stats(player_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::NotFound,
                format!("no stats for player {player_id}"),
            )
        })
}

pub async fn create_stats(
    ctx: &ApiContext,
    player_id: &PlayerId,
    initial: PlayerStats,
) -> Result<(), ApiError> {
    ensure_player_id(player_id)?;
    let created = ctx
        .storage
        .create_stats(player_id, initial)
        .await
        .map_err(internal)?;
    if created {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorCode::Conflict,
            format!("stats for player {player_id} already exist"),
        ))
    }
}

pub async fn increment_stat(
    ctx: &ApiContext,
    player_id: &PlayerId,
    stat: StatKind,
) -> Result<PlayerStats, ApiError> {
    ensure_player_id(player_id)?;
    let stats = ctx
        .storage
        .increment_stat(player_id, stat)
        .await
        .map_err(internal)?;
    info!(player_id = %player_id, stat = stat.column(), "player stat incremented");
    Ok(stats)
}

pub async fn leaderboard(ctx: &ApiContext, limit: u32) -> Result<Vec<LeaderboardEntry>, ApiError> {
    ctx.storage
        .leaderboard(limit.clamp(1, MAX_LIST_LIMIT))
        .await
        .map_err(internal)
}

/// Rejects writes that would break board invariants: a move places exactly
/// one mark of the side to move, marks never disappear (except a full
/// reset), and a finish records the winner the board shows.
fn validate_update(current: &MatchDocument, update: &MatchUpdate) -> Result<(), ApiError> {
    if update.ends_game(current) {
        let outcome = update.board.unwrap_or(current.board).detect_outcome();
        if !outcome.is_terminal() || update.winner != Some(Winner::from(outcome)) {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "finish does not match the outcome on the board",
            ));
        }
    }

    let Some(board) = update.board else {
        return Ok(());
    };

    if !board.has_valid_turn_balance() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "board has an impossible number of X and O marks",
        ));
    }

    let is_reset = board == Board::new();
    if !is_reset {
        let reverted = current
            .board
            .cells()
            .iter()
            .zip(board.cells())
            .any(|(before, after)| before.is_some() && before != after);
        if reverted {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "occupied cells cannot be cleared or overwritten",
            ));
        }

        let placed: Vec<_> = current
            .board
            .cells()
            .iter()
            .zip(board.cells())
            .filter_map(|(before, after)| match (before, after) {
                (None, Some(mark)) => Some(*mark),
                _ => None,
            })
            .collect();
        if placed != [current.turn] {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("a move places exactly one {} mark", current.turn),
            ));
        }
    }

    if let Some(turn) = update.turn {
        if !board.detect_outcome().is_terminal() && turn != board.next_mark() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("turn {turn} does not match the board"),
            ));
        }
    }

    Ok(())
}

fn ensure_player_id(player_id: &PlayerId) -> Result<(), ApiError> {
    if player_id.as_str().trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "player id must not be empty"));
    }
    Ok(())
}

fn not_found(match_id: MatchId) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("match {} not found", match_id.0))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
