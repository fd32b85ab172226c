use game::{Board, Cell};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::PlayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    Move,
    Win,
    Lose,
    Draw,
}

/// Rendering, audio and input surface the controllers drive.
pub trait Presentation {
    fn render_cell(&mut self, index: usize, cell: Cell);
    fn set_status_text(&mut self, text: &str);
    fn play_cue(&mut self, cue: Cue);
    fn disable_input(&mut self);
    fn enable_input(&mut self);
    /// Flips background sound and returns whether it is now on.
    fn toggle_sound(&mut self) -> bool;
}

pub fn render_board(presentation: &mut dyn Presentation, board: &Board) {
    for (index, cell) in board.cells().iter().enumerate() {
        presentation.render_cell(index, *cell);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("audio playback blocked until the user interacts")]
pub struct AudioBlocked;

/// Platform audio output.
pub trait AudioSink {
    fn play(&mut self, cue: Cue) -> Result<(), AudioBlocked>;
    fn unlock(&mut self) -> Result<(), AudioBlocked>;
}

/// Plays cues through an [`AudioSink`], unlocking it the first time it
/// reports [`AudioBlocked`]. Playback failures never reach the caller.
pub struct CuePlayer<S: AudioSink> {
    sink: S,
    enabled: bool,
    unlock_attempted: bool,
}

impl<S: AudioSink> CuePlayer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            enabled: true,
            unlock_attempted: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn toggle_sound(&mut self) -> bool {
        self.enabled = !self.enabled;
        debug!(enabled = self.enabled, "sound toggled");
        self.enabled
    }

    pub fn play(&mut self, cue: Cue) {
        if !self.enabled {
            return;
        }
        if let Err(err) = self.try_play(cue) {
            warn!(?cue, "cue playback failed: {err}");
        }
    }

    fn try_play(&mut self, cue: Cue) -> Result<(), PlayError> {
        match self.sink.play(cue) {
            Ok(()) => Ok(()),
            Err(AudioBlocked) if !self.unlock_attempted => {
                self.unlock_attempted = true;
                self.sink.unlock()?;
                self.sink.play(cue)?;
                Ok(())
            }
            Err(blocked) => Err(blocked.into()),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
#[path = "tests/presentation_tests.rs"]
mod tests;
