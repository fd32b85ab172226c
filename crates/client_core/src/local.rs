use game::{choose_move, Board, Mark, Outcome};
use rand::{rngs::StdRng, Rng};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    config::LocalTimings,
    error::PlayError,
    presentation::{render_board, Cue, Presentation},
};

pub const HUMAN_MARK: Mark = Mark::X;
pub const AI_MARK: Mark = Mark::O;

pub const YOUR_TURN_TEXT: &str = "Your turn (X)";
pub const AI_THINKING_TEXT: &str = "AI is thinking...";
pub const YOU_WIN_TEXT: &str = "You win!";
pub const YOU_LOSE_TEXT: &str = "You lose! The AI was better this time.";
pub const DRAW_TEXT: &str = "Draw! Nobody wins.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalPhase {
    AwaitingPlayerMove,
    AwaitingAiMove,
    GameOver,
}

/// Single-player game against the AI. The pending AI reply and the
/// post-game restart are deadlines that only fire from [`Self::tick`].
pub struct LocalGameController<R: Rng = StdRng> {
    board: Board,
    phase: LocalPhase,
    outcome: Outcome,
    deadline: Option<Instant>,
    timings: LocalTimings,
    rng: R,
}

impl<R: Rng> LocalGameController<R> {
    pub fn new(timings: LocalTimings, rng: R) -> Self {
        Self {
            board: Board::new(),
            phase: LocalPhase::AwaitingPlayerMove,
            outcome: Outcome::InProgress,
            deadline: None,
            timings,
            rng,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn phase(&self) -> LocalPhase {
        self.phase
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Shows a fresh game. Same as [`Self::restart`].
    pub fn start(&mut self, presentation: &mut dyn Presentation) {
        self.restart(presentation);
    }

    pub fn restart(&mut self, presentation: &mut dyn Presentation) {
        self.board.reset();
        self.phase = LocalPhase::AwaitingPlayerMove;
        self.outcome = Outcome::InProgress;
        self.deadline = None;
        render_board(presentation, &self.board);
        presentation.set_status_text(YOUR_TURN_TEXT);
        presentation.enable_input();
        debug!("local game started");
    }

    /// Places the player's mark. Input outside the player's turn is ignored.
    pub fn select_cell(
        &mut self,
        index: usize,
        presentation: &mut dyn Presentation,
    ) -> Result<(), PlayError> {
        if self.phase != LocalPhase::AwaitingPlayerMove {
            debug!(index, phase = ?self.phase, "ignoring input outside the player's turn");
            return Ok(());
        }

        self.board.apply_move(index, HUMAN_MARK)?;
        presentation.render_cell(index, Some(HUMAN_MARK));
        presentation.play_cue(Cue::Move);

        if !self.check_outcome(presentation) {
            self.phase = LocalPhase::AwaitingAiMove;
            self.deadline = Some(Instant::now() + self.timings.ai_delay);
            presentation.set_status_text(AI_THINKING_TEXT);
            presentation.disable_input();
        }
        Ok(())
    }

    /// Waits for the pending deadline and fires it. Never resolves while
    /// nothing is pending. Cancel-safe: dropping the future before the
    /// deadline leaves the controller untouched.
    pub async fn tick(&mut self, presentation: &mut dyn Presentation) {
        let Some(deadline) = self.deadline else {
            return std::future::pending().await;
        };
        tokio::time::sleep_until(deadline).await;
        self.fire(presentation);
    }

    fn fire(&mut self, presentation: &mut dyn Presentation) {
        self.deadline = None;
        match self.phase {
            LocalPhase::AwaitingAiMove => self.play_ai_move(presentation),
            LocalPhase::GameOver => self.restart(presentation),
            LocalPhase::AwaitingPlayerMove => {}
        }
    }

    fn play_ai_move(&mut self, presentation: &mut dyn Presentation) {
        if let Some(index) = choose_move(&self.board, AI_MARK, &mut self.rng) {
            if self.board.apply_move(index, AI_MARK).is_ok() {
                debug!(index, "ai moved");
                presentation.render_cell(index, Some(AI_MARK));
                presentation.play_cue(Cue::Move);
            }
        }

        if !self.check_outcome(presentation) {
            self.phase = LocalPhase::AwaitingPlayerMove;
            presentation.set_status_text(YOUR_TURN_TEXT);
            presentation.enable_input();
        }
    }

    /// Enters game over on a terminal board. Returns whether it did.
    fn check_outcome(&mut self, presentation: &mut dyn Presentation) -> bool {
        let outcome = self.board.detect_outcome();
        let (text, cue) = match outcome {
            Outcome::InProgress => return false,
            Outcome::Win(mark) if mark == HUMAN_MARK => (YOU_WIN_TEXT, Cue::Win),
            Outcome::Win(_) => (YOU_LOSE_TEXT, Cue::Lose),
            Outcome::Draw => (DRAW_TEXT, Cue::Draw),
        };

        info!(?outcome, "local game over");
        self.outcome = outcome;
        self.phase = LocalPhase::GameOver;
        self.deadline = Some(Instant::now() + self.timings.restart_delay);
        presentation.disable_input();
        presentation.set_status_text(text);
        presentation.play_cue(cue);
        true
    }
}

#[cfg(test)]
#[path = "tests/local_tests.rs"]
mod tests;
