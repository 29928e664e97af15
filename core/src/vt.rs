//! Headless VT100/xterm emulator (C1): feeds raw PTY bytes into a `vt100`
//! parser and synthesizes a replayable screen snapshot for late joiners.
//!
//! Grounded on `Tonksthebear-trybotster/botster_hub`'s `vt100 = "0.15"`
//! dependency for the emulator itself; the snapshot-emission algorithm (SGR
//! run-length diffing, trailing-blank-row compression, cursor positioning)
//! is adapted from `Tonksthebear-trybotster/cli/src/terminal.rs`'s
//! `generate_ansi_snapshot`/`emit_grid_line`/`SgrState`, translated from
//! `alacritty_terminal`'s `Grid`/`Cell` API onto `vt100::Screen`/`Cell`.

use vt100::{Color, Parser};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_SCROLLBACK_ROWS: usize = 0;

/// A headless terminal emulator tracking exactly what a fresh xterm would
/// show after replaying the same byte stream.
pub struct Emulator {
    parser: Parser,
}

impl Emulator {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = if cols == 0 { DEFAULT_COLS } else { cols };
        let rows = if rows == 0 { DEFAULT_ROWS } else { rows };
        Self {
            parser: Parser::new(rows, cols, DEFAULT_SCROLLBACK_ROWS),
        }
    }

    /// Feed raw PTY output bytes. `vt100::Parser::process` tolerates
    /// partial UTF-8 and malformed escape sequences at buffer boundaries by
    /// design, so there is nothing to catch here — bad input degrades to
    /// printable pass-through inside the parser itself.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    /// Resize the emulator. A resize to zero rows or columns is rejected;
    /// the emulator keeps its prior dimensions.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            return;
        }
        self.parser.set_size(rows, cols);
    }

    pub fn size(&self) -> (u16, u16) {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        (cols, rows)
    }

    /// Render a self-contained byte sequence that, fed to a fresh terminal
    /// of this emulator's current dimensions, reproduces the visible
    /// screen: cell contents, colors/attributes, cursor position and
    /// visibility. Always begins with a reset + cursor-home prelude so
    /// replay is idempotent regardless of the receiving terminal's prior
    /// state.
    pub fn snapshot(&self) -> Vec<u8> {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        let mut out = Vec::new();
        out.extend_from_slice(b"\x1b[0m\x1b[H");

        let mut last_nonblank_row: Option<u16> = None;
        let mut rendered_rows: Vec<Vec<u8>> = Vec::with_capacity(rows as usize);
        for row in 0..rows {
            let mut line = Vec::new();
            let had_content = emit_grid_line(&mut line, &screen, row, cols);
            if had_content {
                last_nonblank_row = Some(row);
            }
            rendered_rows.push(line);
        }

        let last_row_to_emit = last_nonblank_row.unwrap_or(0);
        for (row, line) in rendered_rows.iter().enumerate() {
            if row as u16 > last_row_to_emit {
                break;
            }
            out.extend_from_slice(line);
            if (row as u16) < last_row_to_emit {
                out.extend_from_slice(b"\r\n");
            }
        }

        out.extend_from_slice(b"\x1b[0m");
        let cursor = screen.cursor_position();
        out.extend_from_slice(format!("\x1b[{};{}H", cursor.0 + 1, cursor.1 + 1).as_bytes());
        if screen.hide_cursor() {
            out.extend_from_slice(b"\x1b[?25l");
        } else {
            out.extend_from_slice(b"\x1b[?25h");
        }
        out
    }
}

#[derive(Default, PartialEq, Eq, Clone, Copy)]
struct SgrState {
    fg: Option<Color>,
    bg: Option<Color>,
    bold: bool,
    italic: bool,
    underline: bool,
    inverse: bool,
}

impl SgrState {
    fn from_cell(cell: &vt100::Cell) -> Self {
        Self {
            fg: Some(cell.fgcolor()),
            bg: Some(cell.bgcolor()),
            bold: cell.bold(),
            italic: cell.italic(),
            underline: cell.underline(),
            inverse: cell.inverse(),
        }
    }

    /// Always fully reset then reapply — relying on a terminal-dependent
    /// incremental attribute-removal sequence (e.g. "turn off bold only")
    /// is not portable, so every diff pays the cost of a full `\x1b[0`.
    fn emit_diff(&self, out: &mut Vec<u8>, prev: &SgrState) {
        if self == prev {
            return;
        }
        out.extend_from_slice(b"\x1b[0");
        if self.bold {
            out.extend_from_slice(b";1");
        }
        if self.italic {
            out.extend_from_slice(b";3");
        }
        if self.underline {
            out.extend_from_slice(b";4");
        }
        if self.inverse {
            out.extend_from_slice(b";7");
        }
        match self.fg {
            Some(Color::Idx(i)) => out.extend_from_slice(format!(";38;5;{i}").as_bytes()),
            Some(Color::Rgb(r, g, b)) => out.extend_from_slice(format!(";38;2;{r};{g};{b}").as_bytes()),
            _ => {}
        }
        match self.bg {
            Some(Color::Idx(i)) => out.extend_from_slice(format!(";48;5;{i}").as_bytes()),
            Some(Color::Rgb(r, g, b)) => out.extend_from_slice(format!(";48;2;{r};{g};{b}").as_bytes()),
            _ => {}
        }
        out.push(b'm');
    }
}

/// Emit one row's worth of cells with SGR run diffing. Returns whether the
/// row contained any non-blank, non-default cell (used to compress trailing
/// blank rows out of the snapshot).
fn emit_grid_line(out: &mut Vec<u8>, screen: &vt100::Screen, row: u16, cols: u16) -> bool {
    let mut state = SgrState::default();
    let mut had_content = false;
    for col in 0..cols {
        let Some(cell) = screen.cell(row, col) else {
            continue;
        };
        let contents = cell.contents();
        let cell_state = SgrState::from_cell(cell);
        if !contents.is_empty() && contents != " " {
            had_content = true;
        }
        if cell_state != state {
            cell_state.emit_diff(out, &state);
            state = cell_state;
        }
        if contents.is_empty() {
            out.push(b' ');
        } else {
            out.extend_from_slice(contents.as_bytes());
        }
    }
    had_content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_idempotent_after_replay() {
        let mut emu = Emulator::new(20, 5);
        emu.feed(b"hello\r\nworld\x1b[1mBOLD\x1b[0m");
        let snap1 = emu.snapshot();

        let mut replayed = Emulator::new(20, 5);
        replayed.feed(&snap1);
        let snap2 = replayed.snapshot();

        assert_eq!(snap1, snap2);
    }

    #[test]
    fn resize_to_zero_is_rejected() {
        let mut emu = Emulator::new(80, 24);
        emu.resize(0, 24);
        assert_eq!(emu.size(), (80, 24));
        emu.resize(80, 0);
        assert_eq!(emu.size(), (80, 24));
    }

    #[test]
    fn malformed_input_is_absorbed() {
        let mut emu = Emulator::new(10, 3);
        emu.feed(b"\x1b[999999999999zgarbage\xff\xfe");
        emu.feed(b"still alive");
        let snap = emu.snapshot();
        assert!(!snap.is_empty());
    }

    #[test]
    fn trailing_blank_rows_are_compressed() {
        let mut emu = Emulator::new(10, 24);
        emu.feed(b"hi");
        let snap = emu.snapshot();
        let newline_count = snap.windows(2).filter(|w| w == b"\r\n").count();
        assert_eq!(newline_count, 0);
    }
}
