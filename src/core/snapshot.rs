//! Snapshot codec
//!
//! A snapshot is a portable, line/token representation of the visible grid.
//! Runs of cells sharing identical attributes are coalesced into one token,
//! and trailing default-styled blanks are omitted, so the same screen always
//! produces the same snapshot.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cell::{Cell, Color, Style};
use super::screen::{char_width, ScreenBuffer, MAX_COLS, MAX_ROWS};

/// Errors decoding a snapshot from its wire form
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid snapshot dimensions {cols}x{rows}")]
    InvalidDimensions { cols: usize, rows: usize },
}

/// A complete snapshot of the visible screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cols: usize,
    pub rows: usize,
    pub cursor: CursorPosition,
    /// One entry per row, top to bottom
    pub lines: Vec<Vec<Token>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub col: usize,
    pub row: usize,
}

/// A run of characters sharing the same attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    #[serde(default, skip_serializing_if = "Style::is_plain")]
    pub style: Style,
    #[serde(default, skip_serializing_if = "Color::is_default")]
    pub fg: Color,
    #[serde(default, skip_serializing_if = "Color::is_default")]
    pub bg: Color,
}

impl Token {
    fn from_cell(cell: &Cell) -> Self {
        Self {
            text: cell.ch.to_string(),
            style: cell.style,
            fg: cell.fg,
            bg: cell.bg,
        }
    }

    fn matches(&self, cell: &Cell) -> bool {
        self.style == cell.style && self.fg == cell.fg && self.bg == cell.bg
    }

    fn cell(&self, ch: char) -> Cell {
        Cell {
            ch,
            fg: self.fg,
            bg: self.bg,
            style: self.style,
            wide_continuation: false,
        }
    }
}

impl Snapshot {
    /// Serialize the current state of a screen buffer
    pub fn capture(buffer: &ScreenBuffer) -> Self {
        let lines = buffer.rows().map(capture_row).collect();
        let cursor = buffer.cursor();
        Self {
            cols: buffer.width(),
            rows: buffer.height(),
            cursor: CursorPosition {
                col: cursor.col,
                row: cursor.row,
            },
            lines,
        }
    }

    /// Rebuild a screen buffer from this snapshot at its own size, capped
    /// at `MAX_COLS` x `MAX_ROWS`.
    pub fn restore(&self) -> ScreenBuffer {
        self.restore_sized(self.cols.min(MAX_COLS), self.rows.min(MAX_ROWS))
    }

    /// Rebuild a screen buffer of the given size from this snapshot.
    ///
    /// Characters that do not fit the row are dropped, and lines beyond
    /// `rows` are ignored.
    pub fn restore_sized(&self, cols: usize, rows: usize) -> ScreenBuffer {
        let mut buffer = ScreenBuffer::new(cols, rows);
        let cols = buffer.width();
        for (y, line) in self.lines.iter().take(buffer.height()).enumerate() {
            let mut x = 0;
            'tokens: for token in line {
                for ch in token.text.chars() {
                    let w = char_width(ch);
                    if w == 0 {
                        continue;
                    }
                    if x + w > cols {
                        break 'tokens;
                    }
                    buffer.put(x, y, token.cell(ch));
                    x += w;
                }
            }
        }
        buffer.move_cursor_to(self.cursor.row, self.cursor.col);
        buffer
    }

    /// Encode to the JSON wire string
    pub fn encode(&self) -> String {
        // Plain data with string keys, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode from the JSON wire string
    pub fn decode(data: &str) -> Result<Self, SnapshotError> {
        let snapshot: Snapshot = serde_json::from_str(data)?;
        if snapshot.cols == 0
            || snapshot.rows == 0
            || snapshot.cols > MAX_COLS
            || snapshot.rows > MAX_ROWS
        {
            return Err(SnapshotError::InvalidDimensions {
                cols: snapshot.cols,
                rows: snapshot.rows,
            });
        }
        Ok(snapshot)
    }

    /// Plain text of every line joined by newlines
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.iter().map(|t| t.text.as_str()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn capture_row(row: &[Cell]) -> Vec<Token> {
    let end = row
        .iter()
        .rposition(|cell| !cell.is_blank())
        .map_or(0, |i| i + 1);

    let mut tokens: Vec<Token> = Vec::new();
    for cell in row[..end].iter().filter(|c| !c.wide_continuation) {
        match tokens.last_mut() {
            Some(token) if token.matches(cell) => token.text.push(cell.ch),
            _ => tokens.push(Token::from_cell(cell)),
        }
    }
    tokens
}
