use std::panic::{self, AssertUnwindSafe};

use sdfcom_types::{SessionError, DEFAULT_COLS, DEFAULT_ROWS};
use tracing::{debug, warn};
use vt100::{Parser, Screen};

use crate::text::{clean_line, clean_text};

/// Fixed-size terminal screen fed from the raw shell byte stream.
///
/// The grid geometry is chosen at construction and never changes; the remote
/// application draws for exactly this many rows and columns.
pub struct TerminalScreen {
    parser: Parser,
    cols: u16,
    rows: u16,
    rejected_chunks: u64,
}

impl TerminalScreen {
    /// Create a new screen
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            parser: Parser::new(rows, cols, 0),
            cols,
            rows,
            rejected_chunks: 0,
        }
    }

    /// Feed a chunk of raw output.
    ///
    /// Never fails. A chunk the emulator cannot process is logged and
    /// dropped, and the grid keeps the state it had before the chunk.
    /// UTF-8 sequences split across chunks are reassembled by the parser;
    /// invalid sequences render as U+FFFD.
    pub fn feed(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Err(e) = self.try_feed(data) {
            self.rejected_chunks += 1;
            warn!("Discarding terminal chunk of {} bytes: {}", data.len(), e);
        }
    }

    fn try_feed(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let snapshot = self.parser.screen().clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.parser.process(data)));

        if outcome.is_err() {
            // The parser may be stuck mid-sequence; restart it on the last good grid.
            self.restore(&snapshot);
            return Err(SessionError::Parse(
                "control sequence could not be interpreted".to_string(),
            ));
        }

        debug!("Fed {} bytes to terminal screen", data.len());
        Ok(())
    }

    /// Replace the parser with a fresh one showing `snapshot`'s grid,
    /// attributes and cursor
    fn restore(&mut self, snapshot: &Screen) {
        let mut parser = Parser::new(self.rows, self.cols, 0);
        parser.process(&snapshot.state_formatted());
        self.parser = parser;
    }

    /// Current visible rows, each cleaned of control characters and ANSI
    /// sequences, whitespace-collapsed and trimmed. Always `rows` entries.
    pub fn render(&self) -> Vec<String> {
        self.raw_rows().map(|row| clean_text(&row)).collect()
    }

    /// Visible rows trimmed at both ends but with inner spacing intact, for
    /// layouts that separate columns by runs of spaces
    pub fn lines(&self) -> Vec<String> {
        self.raw_rows().map(|row| clean_line(&row)).collect()
    }

    /// Non-empty rendered rows joined by newlines
    pub fn display(&self) -> String {
        self.render()
            .into_iter()
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn raw_rows(&self) -> impl Iterator<Item = String> + '_ {
        self.parser.screen().rows(0, self.cols)
    }

    /// Clear the grid to blank, for use after a known full-screen redraw
    pub fn reset(&mut self) {
        self.parser = Parser::new(self.rows, self.cols, 0);
    }

    /// Get cursor position (row, col)
    pub fn cursor_position(&self) -> (u16, u16) {
        self.parser.screen().cursor_position()
    }

    /// Get terminal size (cols, rows)
    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// Number of chunks dropped because they could not be interpreted
    pub fn rejected_chunks(&self) -> u64 {
        self.rejected_chunks
    }
}

impl Default for TerminalScreen {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

impl std::fmt::Debug for TerminalScreen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalScreen")
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("cursor", &self.cursor_position())
            .finish()
    }
}
