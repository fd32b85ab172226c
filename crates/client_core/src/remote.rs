use std::{future::Future, sync::Arc};

use game::{Board, Mark, Outcome};
use shared::{
    domain::{MatchDocument, MatchId, MatchStatus, PlayerId, Winner},
    protocol::{MatchUpdate, Precondition},
};
use tracing::{debug, info, warn};

use crate::{
    config::{ClientConfig, RetryPolicy},
    error::{PlayError, StoreError},
    presentation::{render_board, Cue, Presentation},
    store::{MatchStore, MatchSubscription, UpdateResult},
};

pub const SEARCHING_TEXT: &str = "Searching for a match...";
pub const WAITING_FOR_OPPONENT_TEXT: &str = "Waiting for an opponent...";

const RESTART_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePhase {
    Idle,
    Searching,
    Waiting,
    Active,
    Finished,
}

/// One client's side of an online match. The store document is the source
/// of truth; this keeps a projection of it and writes only through
/// conditional updates.
pub struct RemoteMatchCoordinator {
    player_id: PlayerId,
    matches: Arc<dyn MatchStore>,
    retry: RetryPolicy,
    waiting_query_limit: u32,
    phase: RemotePhase,
    match_id: Option<MatchId>,
    my_mark: Option<Mark>,
    board: Board,
    turn: Mark,
    outcome: Outcome,
    applied_version: u64,
    subscription: Option<MatchSubscription>,
}

impl RemoteMatchCoordinator {
    pub fn new(
        player_id: PlayerId,
        matches: Arc<dyn MatchStore>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            player_id,
            matches,
            retry: config.retry,
            waiting_query_limit: config.waiting_query_limit.max(1),
            phase: RemotePhase::Idle,
            match_id: None,
            my_mark: None,
            board: Board::new(),
            turn: Mark::X,
            outcome: Outcome::InProgress,
            applied_version: 0,
            subscription: None,
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn phase(&self) -> RemotePhase {
        self.phase
    }

    pub fn match_id(&self) -> Option<MatchId> {
        self.match_id
    }

    pub fn my_mark(&self) -> Option<Mark> {
        self.my_mark
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> Mark {
        self.turn
    }

    pub fn applied_version(&self) -> u64 {
        self.applied_version
    }

    /// Claims the oldest waiting match created by someone else, or creates
    /// a new one and waits in it as X.
    pub async fn find_or_create_match(
        &mut self,
        presentation: &mut dyn Presentation,
    ) -> Result<MatchId, PlayError> {
        self.leave();
        self.phase = RemotePhase::Searching;
        presentation.set_status_text(SEARCHING_TEXT);
        presentation.disable_input();

        match self.claim_or_create().await {
            Ok((document, mark)) => self.attach(document, mark, presentation).await,
            Err(err) => {
                self.phase = RemotePhase::Idle;
                Err(err.into())
            }
        }
    }

    async fn claim_or_create(&self) -> Result<(MatchDocument, Mark), StoreError> {
        let limit = self.waiting_query_limit;
        let candidates = with_retry(&self.retry, "query_waiting_matches", || {
            self.matches.query_waiting_matches(limit)
        })
        .await?;

        for candidate in candidates {
            if candidate.player_x.as_ref() == Some(&self.player_id) {
                continue;
            }
            let claimed = with_retry(&self.retry, "claim_match", || {
                self.matches.update_match(
                    candidate.id,
                    MatchUpdate::claim(self.player_id.clone()),
                    Precondition::claimable(),
                )
            })
            .await;
            match claimed {
                Ok(UpdateResult::Applied(document)) => {
                    info!(match_id = document.id.0, player_id = %self.player_id, "claimed waiting match");
                    return Ok((document, Mark::O));
                }
                // A retried claim whose first attempt landed.
                Ok(UpdateResult::Conflict(document))
                    if document.player_o.as_ref() == Some(&self.player_id) =>
                {
                    info!(match_id = document.id.0, player_id = %self.player_id, "claimed waiting match");
                    return Ok((document, Mark::O));
                }
                Ok(UpdateResult::Conflict(_)) | Err(StoreError::MatchNotFound(_)) => {
                    debug!(match_id = candidate.id.0, "waiting match already taken");
                }
                Err(err) => return Err(err),
            }
        }

        let document = with_retry(&self.retry, "create_match", || {
            self.matches.create_match(&self.player_id)
        })
        .await?;
        info!(match_id = document.id.0, player_id = %self.player_id, "created waiting match");
        Ok((document, Mark::X))
    }

    async fn attach(
        &mut self,
        document: MatchDocument,
        mark: Mark,
        presentation: &mut dyn Presentation,
    ) -> Result<MatchId, PlayError> {
        let match_id = document.id;
        self.match_id = Some(match_id);
        self.my_mark = Some(mark);
        self.board = Board::new();
        self.outcome = Outcome::InProgress;
        self.applied_version = 0;

        let subscription = with_retry(&self.retry, "subscribe", || {
            self.matches.subscribe(match_id)
        })
        .await;
        match subscription {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(err) => warn!(match_id = match_id.0, "match subscription failed: {err}"),
        }

        self.handle_snapshot(document, presentation).await?;
        Ok(match_id)
    }

    /// Next pushed snapshot. Never resolves without a subscription;
    /// `None` means the subscription ended.
    pub async fn next_snapshot(&mut self) -> Option<MatchDocument> {
        let Some(subscription) = self.subscription.as_mut() else {
            return std::future::pending().await;
        };
        let next = subscription.next().await;
        if next.is_none() {
            warn!(match_id = subscription.match_id().0, "match subscription ended");
            self.subscription = None;
        }
        next
    }

    /// Projects a snapshot and finishes the match if it shows a terminal
    /// board that is still marked active.
    pub async fn handle_snapshot(
        &mut self,
        document: MatchDocument,
        presentation: &mut dyn Presentation,
    ) -> Result<(), PlayError> {
        if !self.apply_snapshot(&document, presentation) {
            return Ok(());
        }
        if document.status == MatchStatus::Active && self.outcome.is_terminal() {
            self.finish(&document, presentation).await?;
        }
        Ok(())
    }

    /// Replaces the projection with `document` unless it is older than what
    /// is already shown. Returns whether it was applied.
    fn apply_snapshot(&mut self, document: &MatchDocument, presentation: &mut dyn Presentation) -> bool {
        if Some(document.id) != self.match_id {
            return false;
        }
        if document.version <= self.applied_version {
            debug!(
                match_id = document.id.0,
                version = document.version,
                applied = self.applied_version,
                "dropping stale snapshot"
            );
            return false;
        }

        let placed_marks = self.board.empty_cells().len() > document.board.empty_cells().len();
        let was_terminal = self.outcome.is_terminal();
        self.board = document.board;
        self.turn = document.turn;
        self.applied_version = document.version;
        self.outcome = document.board.detect_outcome();
        self.phase = match document.status {
            MatchStatus::Waiting => RemotePhase::Waiting,
            MatchStatus::Active if self.outcome.is_terminal() => RemotePhase::Finished,
            MatchStatus::Active => RemotePhase::Active,
            MatchStatus::Finished => RemotePhase::Finished,
        };

        render_board(presentation, &self.board);
        if placed_marks {
            presentation.play_cue(Cue::Move);
        }

        match self.phase {
            RemotePhase::Waiting => {
                presentation.set_status_text(WAITING_FOR_OPPONENT_TEXT);
                presentation.disable_input();
            }
            RemotePhase::Active => {
                if Some(self.turn) == self.my_mark {
                    presentation.set_status_text(&format!("Your turn ({})", self.turn));
                    presentation.enable_input();
                } else {
                    presentation.set_status_text(&format!("Waiting for {} to move", self.turn));
                    presentation.disable_input();
                }
            }
            RemotePhase::Finished => {
                let (text, cue) = self.outcome_text_and_cue();
                presentation.set_status_text(text);
                presentation.disable_input();
                if !was_terminal {
                    presentation.play_cue(cue);
                }
            }
            RemotePhase::Idle | RemotePhase::Searching => {}
        }
        true
    }

    fn outcome_text_and_cue(&self) -> (&'static str, Cue) {
        match self.outcome {
            Outcome::Win(mark) if Some(mark) == self.my_mark => ("You win!", Cue::Win),
            Outcome::Win(_) => ("You lose!", Cue::Lose),
            _ => ("Draw!", Cue::Draw),
        }
    }

    /// Moves the match from active to finished, conditional on the version
    /// that showed the terminal board. The store credits both players'
    /// statistics in that same write, so a game is counted once whichever
    /// client gets there first. The write runs on its own task and completes
    /// even if this future is dropped.
    async fn finish(
        &mut self,
        seen: &MatchDocument,
        presentation: &mut dyn Presentation,
    ) -> Result<(), PlayError> {
        let match_id = seen.id;
        let winner = Winner::from(seen.board.detect_outcome());
        let precondition = Precondition::version(seen.version).and_status(MatchStatus::Active);
        let matches = Arc::clone(&self.matches);
        let retry = self.retry;

        let write = tokio::spawn(async move {
            with_retry(&retry, "finish_match", || {
                matches.update_match(match_id, MatchUpdate::finish(winner), precondition.clone())
            })
            .await
        });
        let result = write
            .await
            .map_err(|err| PlayError::StoreUnavailable(format!("finish task failed: {err}")))??;

        match result {
            UpdateResult::Applied(document) => {
                info!(match_id = match_id.0, winner = winner.as_str(), "match finished");
                self.apply_snapshot(&document, presentation);
            }
            UpdateResult::Conflict(document) => {
                debug!(
                    match_id = match_id.0,
                    version = document.version,
                    "match moved on before this client finished it"
                );
                self.apply_snapshot(&document, presentation);
            }
        }
        Ok(())
    }

    /// Plays this client's mark at `index` if the store still says it is
    /// this client's turn. Losing the write to the opponent is `NotYourTurn`.
    pub async fn submit_move(
        &mut self,
        index: usize,
        presentation: &mut dyn Presentation,
    ) -> Result<(), PlayError> {
        let (Some(match_id), Some(mark)) = (self.match_id, self.my_mark) else {
            return Err(PlayError::NoActiveMatch);
        };
        if !self.board.is_empty_at(index) {
            return Err(PlayError::InvalidMove { index });
        }

        let current = with_retry(&self.retry, "get_match", || self.matches.get_match(match_id)).await?;
        if current.status != MatchStatus::Active
            || current.turn != mark
            || current.board.detect_outcome().is_terminal()
        {
            self.handle_snapshot(current, presentation).await?;
            return Err(PlayError::NotYourTurn);
        }

        let mut board = current.board;
        board.apply_move(index, mark)?;
        let update = MatchUpdate::play(board, mark.opponent());
        let precondition =
            Precondition::version(current.version).and_status(MatchStatus::Active);

        let result = with_retry(&self.retry, "submit_move", || {
            self.matches
                .update_match(match_id, update.clone(), precondition.clone())
        })
        .await?;
        let landed = |document: &MatchDocument| {
            document.version == current.version + 1 && document.board == board
        };

        match result {
            UpdateResult::Applied(document) => {
                debug!(match_id = match_id.0, index, version = document.version, "move applied");
                self.handle_snapshot(document, presentation).await
            }
            // A retried move whose first attempt landed.
            UpdateResult::Conflict(document) if landed(&document) => {
                debug!(match_id = match_id.0, index, version = document.version, "move applied");
                self.handle_snapshot(document, presentation).await
            }
            UpdateResult::Conflict(document) => {
                debug!(match_id = match_id.0, index, "move lost to a concurrent write");
                self.handle_snapshot(document, presentation).await?;
                Err(PlayError::NotYourTurn)
            }
        }
    }

    /// Clears the board of an active or finished match for another game.
    pub async fn restart(&mut self, presentation: &mut dyn Presentation) -> Result<(), PlayError> {
        let Some(match_id) = self.match_id else {
            return Err(PlayError::NoActiveMatch);
        };

        for _ in 0..RESTART_ATTEMPTS {
            let current =
                with_retry(&self.retry, "get_match", || self.matches.get_match(match_id)).await?;
            if current.status == MatchStatus::Waiting {
                self.handle_snapshot(current, presentation).await?;
                return Err(PlayError::NotYourTurn);
            }

            let precondition = Precondition::version(current.version);
            let result = with_retry(&self.retry, "restart_match", || {
                self.matches
                    .update_match(match_id, MatchUpdate::restart(), precondition.clone())
            })
            .await?;
            if let UpdateResult::Applied(document) = result {
                info!(match_id = match_id.0, "match restarted");
                return self.handle_snapshot(document, presentation).await;
            }
        }

        Err(PlayError::NotYourTurn)
    }

    /// Drops the match reference and its subscription. The match itself is
    /// left as it is in the store.
    pub fn leave(&mut self) {
        if let Some(match_id) = self.match_id.take() {
            info!(match_id = match_id.0, player_id = %self.player_id, "left match");
        }
        self.subscription = None;
        self.my_mark = None;
        self.phase = RemotePhase::Idle;
        self.board = Board::new();
        self.outcome = Outcome::InProgress;
        self.applied_version = 0;
    }
}

async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut retry = 0;
    loop {
        match call().await {
            Err(StoreError::Unavailable(reason)) if retry + 1 < policy.attempts => {
                retry += 1;
                let delay = policy.delay_before(retry);
                warn!(operation, retry, ?delay, "store unavailable, retrying: {reason}");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
