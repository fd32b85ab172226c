use std::io::{self, Write};

use client_core::{AudioBlocked, AudioSink, Cue, CuePlayer, Presentation};
use shared::{Cell, Mark};

const CELLS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Cell(usize),
    Ai,
    Online,
    Restart,
    Sound,
    Stats,
    Help,
    Quit,
}

/// Parses one input line. Cells are 0-8, or 1-9 with `one_based`.
pub fn parse_command(line: &str, one_based: bool) -> Option<Command> {
    let word = line.trim().to_ascii_lowercase();
    let command = match word.as_str() {
        "ai" => Command::Ai,
        "online" => Command::Online,
        "restart" | "r" => Command::Restart,
        "sound" => Command::Sound,
        "stats" => Command::Stats,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => {
            let number: usize = other.parse().ok()?;
            let index = if one_based {
                number.checked_sub(1)?
            } else {
                number
            };
            if index >= CELLS {
                return None;
            }
            Command::Cell(index)
        }
    };
    Some(command)
}

pub fn help_text(one_based: bool) -> String {
    let (first, last) = if one_based { (1, 9) } else { (0, 8) };
    format!(
        "commands: {first}-{last} play a cell, ai, online, restart, sound, stats, help, quit"
    )
}

/// Rings the terminal bell for every cue.
pub struct TerminalBell;

impl AudioSink for TerminalBell {
    fn play(&mut self, _cue: Cue) -> Result<(), AudioBlocked> {
        let mut out = io::stdout();
        out.write_all(b"\x07")
            .and_then(|()| out.flush())
            .map_err(|_| AudioBlocked)
    }

    fn unlock(&mut self) -> Result<(), AudioBlocked> {
        Ok(())
    }
}

/// Text board on stdout, redrawn on every status change.
pub struct TerminalView<S: AudioSink = TerminalBell> {
    cells: [Cell; CELLS],
    status: String,
    input_enabled: bool,
    one_based: bool,
    cues: CuePlayer<S>,
}

impl<S: AudioSink> TerminalView<S> {
    pub fn new(sink: S, one_based: bool) -> Self {
        Self {
            cells: [None; CELLS],
            status: String::new(),
            input_enabled: false,
            one_based,
            cues: CuePlayer::new(sink),
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn render(&self) -> String {
        let offset = usize::from(self.one_based);
        let rows: Vec<String> = self
            .cells
            .chunks(3)
            .enumerate()
            .map(|(row, cells)| {
                cells
                    .iter()
                    .enumerate()
                    .map(|(col, cell)| match cell {
                        Some(Mark::X) => "X".to_string(),
                        Some(Mark::O) => "O".to_string(),
                        None => (row * 3 + col + offset).to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect();
        format!(
            " {}\n---+---+---\n {}\n---+---+---\n {}\n\n{}",
            rows[0], rows[1], rows[2], self.status
        )
    }
}

impl<S: AudioSink> Presentation for TerminalView<S> {
    fn render_cell(&mut self, index: usize, cell: Cell) {
        if let Some(slot) = self.cells.get_mut(index) {
            *slot = cell;
        }
    }

    fn set_status_text(&mut self, text: &str) {
        self.status = text.to_string();
        println!("\n{}", self.render());
    }

    fn play_cue(&mut self, cue: Cue) {
        self.cues.play(cue);
    }

    fn disable_input(&mut self) {
        self.input_enabled = false;
    }

    fn enable_input(&mut self) {
        self.input_enabled = true;
    }

    fn toggle_sound(&mut self) -> bool {
        self.cues.toggle_sound()
    }
}

#[cfg(test)]
#[path = "tests/terminal_tests.rs"]
mod tests;
