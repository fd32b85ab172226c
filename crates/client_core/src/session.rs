use std::sync::Arc;

use rand::{rngs::StdRng, SeedableRng};
use shared::domain::{PlayerId, PlayerStats};
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    error::PlayError,
    local::LocalGameController,
    presentation::Presentation,
    remote::RemoteMatchCoordinator,
    store::{MatchStore, StatsStore},
};

pub const SELECT_MODE_TEXT: &str = "Select a game mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ai,
    Online,
}

pub enum ActiveController {
    Local(LocalGameController),
    Remote(RemoteMatchCoordinator),
}

impl ActiveController {
    pub fn mode(&self) -> Mode {
        match self {
            ActiveController::Local(_) => Mode::Ai,
            ActiveController::Remote(_) => Mode::Online,
        }
    }
}

/// Everything one player's client holds: identity, stores, the view and the
/// single active controller.
pub struct Session<P: Presentation> {
    player_id: PlayerId,
    config: ClientConfig,
    matches: Arc<dyn MatchStore>,
    stats: Arc<dyn StatsStore>,
    presentation: P,
    active: Option<ActiveController>,
}

impl<P: Presentation> Session<P> {
    pub fn new(
        player_id: PlayerId,
        config: ClientConfig,
        matches: Arc<dyn MatchStore>,
        stats: Arc<dyn StatsStore>,
        mut presentation: P,
    ) -> Self {
        presentation.set_status_text(SELECT_MODE_TEXT);
        presentation.disable_input();
        Self {
            player_id,
            config,
            matches,
            stats,
            presentation,
            active: None,
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn mode(&self) -> Option<Mode> {
        self.active.as_ref().map(ActiveController::mode)
    }

    pub fn active(&self) -> Option<&ActiveController> {
        self.active.as_ref()
    }

    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    pub fn presentation_mut(&mut self) -> &mut P {
        &mut self.presentation
    }

    /// Discards the current game and starts `mode`. Leaving online mode
    /// releases the match subscription without finishing the match.
    pub async fn select_mode(&mut self, mode: Mode) -> Result<(), PlayError> {
        if let Some(ActiveController::Remote(mut coordinator)) = self.active.take() {
            coordinator.leave();
        }
        info!(player_id = %self.player_id, ?mode, "mode selected");

        match mode {
            Mode::Ai => {
                let rng = match self.config.ai_seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let mut controller = LocalGameController::new(self.config.local, rng);
                controller.start(&mut self.presentation);
                self.active = Some(ActiveController::Local(controller));
                Ok(())
            }
            Mode::Online => {
                let mut coordinator = RemoteMatchCoordinator::new(
                    self.player_id.clone(),
                    Arc::clone(&self.matches),
                    &self.config,
                );
                let result = coordinator
                    .find_or_create_match(&mut self.presentation)
                    .await
                    .map(|_| ());
                self.active = Some(ActiveController::Remote(coordinator));
                self.report(result)
            }
        }
    }

    pub async fn select_cell(&mut self, index: usize) -> Result<(), PlayError> {
        let result = match self.active.as_mut() {
            Some(ActiveController::Local(controller)) => {
                controller.select_cell(index, &mut self.presentation)
            }
            Some(ActiveController::Remote(coordinator)) => {
                coordinator.submit_move(index, &mut self.presentation).await
            }
            None => {
                self.presentation.set_status_text(SELECT_MODE_TEXT);
                Ok(())
            }
        };
        self.report(result)
    }

    pub async fn restart(&mut self) -> Result<(), PlayError> {
        let result = match self.active.as_mut() {
            Some(ActiveController::Local(controller)) => {
                controller.restart(&mut self.presentation);
                Ok(())
            }
            Some(ActiveController::Remote(coordinator)) => {
                coordinator.restart(&mut self.presentation).await
            }
            None => Ok(()),
        };
        self.report(result)
    }

    pub fn toggle_sound(&mut self) -> bool {
        self.presentation.toggle_sound()
    }

    pub async fn stats(&self) -> Result<Option<PlayerStats>, PlayError> {
        Ok(self.stats.get_stats(&self.player_id).await?)
    }

    /// Waits for the next thing that happens without user input: a local
    /// timer firing or a pushed match snapshot. Never resolves when there is
    /// nothing to wait for.
    pub async fn next_event(&mut self) {
        match self.active.as_mut() {
            Some(ActiveController::Local(controller)) => {
                controller.tick(&mut self.presentation).await;
            }
            Some(ActiveController::Remote(coordinator)) => {
                let result = match coordinator.next_snapshot().await {
                    Some(document) => {
                        coordinator
                            .handle_snapshot(document, &mut self.presentation)
                            .await
                    }
                    None => {
                        self.presentation
                            .set_status_text("Connection to the match was lost");
                        Ok(())
                    }
                };
                let _ = self.report(result);
            }
            None => std::future::pending().await,
        }
    }

    /// Turns a failed action into a notice. Nothing here is fatal.
    fn report(&mut self, result: Result<(), PlayError>) -> Result<(), PlayError> {
        if let Err(err) = &result {
            match err {
                PlayError::InvalidMove { index } => debug!(index, "ignored invalid move"),
                PlayError::NotYourTurn => self.presentation.set_status_text("Not your turn"),
                PlayError::StoreUnavailable(reason) => {
                    warn!(player_id = %self.player_id, "store unavailable: {reason}");
                    self.presentation
                        .set_status_text("Match store unavailable, please try again");
                }
                PlayError::MatchNotFound(match_id) => {
                    warn!(match_id = match_id.0, "match disappeared from the store");
                    self.presentation.set_status_text("The match no longer exists");
                }
                PlayError::NoActiveMatch => {
                    self.presentation.set_status_text("No match in progress")
                }
                PlayError::Rejected(reason) => {
                    warn!(player_id = %self.player_id, "store rejected request: {reason}");
                    self.presentation.set_status_text("The store rejected that action");
                }
                PlayError::AudioBlocked => warn!("audio playback blocked"),
            }
        }
        result
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
