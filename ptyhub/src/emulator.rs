// In-memory VT100/xterm-compatible screen + scrollback, backed by
// shpool_vt100. Consumes raw PTY bytes and answers the read-side queries
// a Session needs: full buffer text, visible viewport, cursor, dimensions.

use ptyhub_protocol::{CursorPosition, Dimensions};

pub struct TerminalEmulator {
    parser: shpool_vt100::Parser,
    scrollback: usize,
}

impl TerminalEmulator {
    pub fn new(cols: u16, rows: u16, scrollback: usize) -> TerminalEmulator {
        TerminalEmulator { parser: shpool_vt100::Parser::new(rows, cols, scrollback), scrollback }
    }

    /// Interprets SGR, cursor-move, erase-in-display/line, alternate
    /// screen, scroll region and OSC sequences via the underlying parser.
    pub fn write(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    /// Resizes the screen, preserving buffer content where the
    /// underlying parser's reflow logic allows.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.parser.screen_mut().set_size(rows, cols);
    }

    /// Entire buffer (scrollback + visible screen), trailing empty lines
    /// trimmed, newline-joined plain text.
    pub fn get_full_content(&self) -> String {
        let (rows, _) = self.parser.screen().size();
        let total = self.scrollback.saturating_add(rows as usize).min(u16::MAX as usize) as u16;
        let formatted = self.parser.screen().last_n_rows_contents_formatted(total);
        plain_text(&formatted)
    }

    /// Exactly `rows` lines starting at the current base row (the
    /// currently visible screen, never scrollback).
    pub fn get_viewport(&self) -> String {
        let (rows, _) = self.parser.screen().size();
        let formatted = self.parser.screen().contents_formatted();
        let text = plain_text(&formatted);
        pad_to_exact_lines(&text, rows)
    }

    pub fn get_cursor(&self) -> CursorPosition {
        let (row, col) = self.parser.screen().cursor_position();
        CursorPosition { x: col, y: row }
    }

    pub fn dimensions(&self) -> Dimensions {
        let (rows, cols) = self.parser.screen().size();
        Dimensions { cols, rows }
    }

    pub fn clear(&mut self) {
        let (rows, cols) = self.parser.screen().size();
        self.parser = shpool_vt100::Parser::new(rows, cols, self.scrollback);
    }
}

fn plain_text(formatted: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(formatted);
    let text = String::from_utf8_lossy(&stripped).into_owned();
    let trimmed: Vec<&str> = {
        let mut lines: Vec<&str> = text.lines().collect();
        while matches!(lines.last(), Some(l) if l.trim().is_empty()) {
            lines.pop();
        }
        lines
    };
    trimmed.join("\n")
}

fn pad_to_exact_lines(text: &str, rows: u16) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    lines.truncate(rows as usize);
    let mut out: Vec<String> = lines.into_iter().map(str::to_string).collect();
    while out.len() < rows as usize {
        out.push(String::new());
    }
    out.join("\n")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dimensions_reflect_construction() {
        let emu = TerminalEmulator::new(80, 24, 1000);
        let dims = emu.dimensions();
        assert_eq!((dims.cols, dims.rows), (80, 24));
    }

    #[test]
    fn resize_updates_dimensions() {
        let mut emu = TerminalEmulator::new(80, 24, 1000);
        emu.resize(100, 30);
        let dims = emu.dimensions();
        assert_eq!((dims.cols, dims.rows), (100, 30));
    }

    #[test]
    fn viewport_is_exactly_rows_lines() {
        let mut emu = TerminalEmulator::new(80, 24, 1000);
        emu.write(b"hello\r\n");
        let viewport = emu.get_viewport();
        assert_eq!(viewport.lines().count(), 24);
    }

    #[test]
    fn written_text_is_recoverable_from_full_content() {
        let mut emu = TerminalEmulator::new(80, 24, 1000);
        emu.write(b"HELLO\r\n");
        assert!(emu.get_full_content().contains("HELLO"));
    }
}
