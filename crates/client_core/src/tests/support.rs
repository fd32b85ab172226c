use game::{Cell, BOARD_CELLS};

use crate::presentation::{Cue, Presentation};

#[derive(Debug, Default)]
pub(crate) struct RecordingPresentation {
    pub cells: [Cell; BOARD_CELLS],
    pub statuses: Vec<String>,
    pub cues: Vec<Cue>,
    pub input_enabled: bool,
    pub sound_on: bool,
}

impl RecordingPresentation {
    pub fn status(&self) -> &str {
        self.statuses.last().map(String::as_str).unwrap_or_default()
    }
}

impl Presentation for RecordingPresentation {
    fn render_cell(&mut self, index: usize, cell: Cell) {
        self.cells[index] = cell;
    }

    fn set_status_text(&mut self, text: &str) {
        self.statuses.push(text.to_string());
    }

    fn play_cue(&mut self, cue: Cue) {
        self.cues.push(cue);
    }

    fn disable_input(&mut self) {
        self.input_enabled = false;
    }

    fn enable_input(&mut self) {
        self.input_enabled = true;
    }

    fn toggle_sound(&mut self) -> bool {
        self.sound_on = !self.sound_on;
        self.sound_on
    }
}
