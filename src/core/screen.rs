//! Screen buffer implementation
//!
//! The screen buffer is the visible character grid plus the cursor, the
//! current pen (SGR state), the scroll region and tab stops. It supports a
//! primary and an alternate grid.
//!
//! All direct accessors are bounds-checked and never panic: output from a
//! child process can legitimately race with a concurrent resize, so writes
//! outside the grid are dropped and reads outside it return a blank.

use std::fmt;

use unicode_width::UnicodeWidthChar;

use super::cell::{Cell, Pen};
use super::cursor::{Cursor, SavedCursor};

/// Display width of a character in cells (0, 1 or 2)
pub(crate) fn char_width(c: char) -> usize {
    UnicodeWidthChar::width(c).unwrap_or(0).min(2)
}

/// Repair wide-character pairs in a row after a bulk mutation.
///
/// Every continuation cell must follow a wide head, and every wide head must
/// be followed by its continuation. Orphaned halves become blanks.
fn normalize_row(row: &mut [Cell]) {
    let len = row.len();
    for x in 0..len {
        if row[x].wide_continuation {
            let has_head = x > 0 && !row[x - 1].wide_continuation && char_width(row[x - 1].ch) == 2;
            if !has_head {
                row[x].wide_continuation = false;
                row[x].ch = ' ';
            }
        } else if char_width(row[x].ch) == 2 {
            let has_tail = x + 1 < len && row[x + 1].wide_continuation;
            if !has_tail {
                row[x].ch = ' ';
            }
        }
    }
}

fn blank_row(width: usize) -> Vec<Cell> {
    vec![Cell::default(); width]
}

fn default_tab_stops(width: usize) -> Vec<bool> {
    (0..width).map(|i| i > 0 && i % 8 == 0).collect()
}

/// The screen buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenBuffer {
    /// Number of columns
    width: usize,
    /// Number of rows
    height: usize,
    /// Active grid (row-major)
    grid: Vec<Vec<Cell>>,
    /// Primary grid and cursor, stashed while the alternate screen is active
    primary_stash: Option<(Vec<Vec<Cell>>, Cursor)>,
    cursor: Cursor,
    saved_cursor: Option<SavedCursor>,
    /// Attributes applied to newly printed characters
    pen: Pen,
    /// Scroll region top (0-indexed, inclusive)
    scroll_top: usize,
    /// Scroll region bottom (0-indexed, inclusive)
    scroll_bottom: usize,
    tab_stops: Vec<bool>,
    /// Autowrap mode (DECAWM)
    autowrap: bool,
}

/// Largest accepted width in columns
pub const MAX_COLS: usize = 1000;
/// Largest accepted height in rows
pub const MAX_ROWS: usize = 1000;

impl ScreenBuffer {
    /// Create a blank buffer. Dimensions are clamped to
    /// `1..=MAX_COLS` x `1..=MAX_ROWS`.
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.clamp(1, MAX_COLS);
        let height = height.clamp(1, MAX_ROWS);
        Self {
            width,
            height,
            grid: (0..height).map(|_| blank_row(width)).collect(),
            primary_stash: None,
            cursor: Cursor::new(),
            saved_cursor: None,
            pen: Pen::default(),
            scroll_top: 0,
            scroll_bottom: height - 1,
            tab_stops: default_tab_stops(width),
            autowrap: true,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    pub fn pen(&self) -> &Pen {
        &self.pen
    }

    pub fn pen_mut(&mut self) -> &mut Pen {
        &mut self.pen
    }

    pub fn scroll_top(&self) -> usize {
        self.scroll_top
    }

    pub fn scroll_bottom(&self) -> usize {
        self.scroll_bottom
    }

    pub fn is_alternate(&self) -> bool {
        self.primary_stash.is_some()
    }

    pub fn set_autowrap(&mut self, enabled: bool) {
        self.autowrap = enabled;
    }

    // ------------------------------------------------------------------
    // Direct accessors
    // ------------------------------------------------------------------

    /// Character at `(x, y)`, or a space when out of bounds
    pub fn get(&self, x: usize, y: usize) -> char {
        match self.cell(x, y) {
            Some(cell) if !cell.wide_continuation => cell.ch,
            _ => ' ',
        }
    }

    /// Write a default-styled character at `(x, y)`. Out-of-bounds writes are dropped.
    pub fn set(&mut self, x: usize, y: usize, ch: char) {
        if x >= self.width || y >= self.height || char_width(ch) == 0 {
            return;
        }
        self.put(x, y, Cell::new(ch));
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<&Cell> {
        self.grid.get(y).and_then(|row| row.get(x))
    }

    /// Replace a whole cell. Out-of-bounds writes are dropped.
    pub fn set_cell(&mut self, x: usize, y: usize, cell: Cell) {
        if let Some(row) = self.grid.get_mut(y) {
            if let Some(slot) = row.get_mut(x) {
                *slot = cell;
                normalize_row(row);
            }
        }
    }

    pub fn row(&self, y: usize) -> Option<&[Cell]> {
        self.grid.get(y).map(|row| row.as_slice())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.grid.iter().map(|row| row.as_slice())
    }

    /// Visible text of row `y` with trailing blanks trimmed; empty when out of bounds
    pub fn get_line(&self, y: usize) -> String {
        match self.grid.get(y) {
            Some(row) => row_text(row),
            None => String::new(),
        }
    }

    /// Replace row `y` with `text`, truncated to the buffer width.
    /// Out-of-bounds rows are ignored.
    pub fn set_line(&mut self, y: usize, text: &str) {
        let width = self.width;
        let Some(row) = self.grid.get_mut(y) else {
            return;
        };
        *row = blank_row(width);
        let mut x = 0;
        for ch in text.chars() {
            let w = char_width(ch);
            if w == 0 {
                continue;
            }
            if x + w > width {
                break;
            }
            row[x] = Cell::new(ch);
            if w == 2 {
                row[x + 1] = Cell {
                    wide_continuation: true,
                    ..Cell::default()
                };
            }
            x += w;
        }
    }

    /// Resize the grid, keeping the top-left overlapping region.
    pub fn resize(&mut self, width: usize, height: usize) {
        let width = width.clamp(1, MAX_COLS);
        let height = height.clamp(1, MAX_ROWS);
        if width == self.width && height == self.height {
            return;
        }

        self.grid = resize_grid(&self.grid, width, height);
        if let Some((stash, cursor)) = self.primary_stash.as_mut() {
            *stash = resize_grid(stash, width, height);
            cursor.clamp(width, height);
        }

        let mut tab_stops = default_tab_stops(width);
        for (dst, src) in tab_stops.iter_mut().zip(self.tab_stops.iter()) {
            *dst = *src;
        }
        self.tab_stops = tab_stops;

        self.width = width;
        self.height = height;
        self.scroll_top = 0;
        self.scroll_bottom = height - 1;
        self.cursor.clamp(width, height);
        if let Some(saved) = self.saved_cursor.as_mut() {
            saved.col = saved.col.min(width - 1);
            saved.row = saved.row.min(height - 1);
        }
    }

    /// Full reset (RIS)
    pub fn reset(&mut self) {
        *self = Self::new(self.width, self.height);
    }

    // ------------------------------------------------------------------
    // Printing
    // ------------------------------------------------------------------

    /// Print a character at the cursor using the current pen
    pub fn print(&mut self, c: char) {
        let w = char_width(c);
        if w == 0 || w > self.width {
            return;
        }

        if self.cursor.pending_wrap {
            self.wrap_cursor();
        }

        // A wide character never straddles the right margin
        if w == 2 && self.cursor.col == self.width - 1 {
            if self.autowrap {
                let (col, row) = (self.cursor.col, self.cursor.row);
                let bg = self.pen.bg;
                self.break_wide(col, row);
                self.grid[row][col].erase(bg);
                self.wrap_cursor();
            } else {
                return;
            }
        }

        let (col, row) = (self.cursor.col, self.cursor.row);
        let pen = self.pen;
        self.put(col, row, Cell::with_pen(c, &pen));

        let next = col + w;
        if next >= self.width {
            self.cursor.col = self.width - 1;
            self.cursor.pending_wrap = self.autowrap;
        } else {
            self.cursor.col = next;
        }
    }

    /// Place a cell (and its continuation when wide) without moving the cursor
    pub(crate) fn put(&mut self, x: usize, y: usize, cell: Cell) {
        let w = char_width(cell.ch);
        self.break_wide(x, y);
        if w == 2 {
            if x + 1 >= self.width {
                return;
            }
            self.break_wide(x + 1, y);
            self.grid[y][x + 1] = Cell {
                ch: ' ',
                wide_continuation: true,
                ..cell
            };
        }
        self.grid[y][x] = cell;
    }

    /// Blank the other half of a wide pair that overlaps `(x, y)`
    fn break_wide(&mut self, x: usize, y: usize) {
        let row = &mut self.grid[y];
        if row[x].wide_continuation {
            if x > 0 {
                row[x - 1].ch = ' ';
            }
            row[x].wide_continuation = false;
            row[x].ch = ' ';
        } else if char_width(row[x].ch) == 2 && x + 1 < row.len() && row[x + 1].wide_continuation {
            row[x + 1].wide_continuation = false;
            row[x + 1].ch = ' ';
        }
    }

    fn wrap_cursor(&mut self) {
        self.cursor.pending_wrap = false;
        self.cursor.col = 0;
        self.advance_row();
    }

    fn advance_row(&mut self) {
        if self.cursor.row == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor.row < self.height - 1 {
            self.cursor.row += 1;
        }
    }

    // ------------------------------------------------------------------
    // C0 controls
    // ------------------------------------------------------------------

    /// Line feed (LF, VT, FF)
    pub fn linefeed(&mut self) {
        self.cursor.pending_wrap = false;
        self.advance_row();
    }

    pub fn carriage_return(&mut self) {
        self.cursor.carriage_return();
    }

    pub fn backspace(&mut self) {
        self.cursor.pending_wrap = false;
        self.cursor.col = self.cursor.col.saturating_sub(1);
    }

    /// Horizontal tab (HT)
    pub fn tab(&mut self) {
        self.cursor.pending_wrap = false;
        let from = self.cursor.col + 1;
        let next = (from..self.width).find(|&i| self.tab_stops[i]);
        self.cursor.col = next.unwrap_or(self.width - 1);
    }

    pub fn set_tab_stop(&mut self) {
        let col = self.cursor.col;
        if let Some(stop) = self.tab_stops.get_mut(col) {
            *stop = true;
        }
    }

    pub fn clear_tab_stop(&mut self) {
        let col = self.cursor.col;
        if let Some(stop) = self.tab_stops.get_mut(col) {
            *stop = false;
        }
    }

    pub fn clear_all_tab_stops(&mut self) {
        self.tab_stops.iter_mut().for_each(|t| *t = false);
    }

    /// Reverse index (RI): move up, scrolling down at the top margin
    pub fn reverse_index(&mut self) {
        self.cursor.pending_wrap = false;
        if self.cursor.row == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
        }
    }

    /// Next line (NEL)
    pub fn next_line(&mut self) {
        self.linefeed();
        self.cursor.col = 0;
    }

    // ------------------------------------------------------------------
    // Cursor movement
    // ------------------------------------------------------------------

    pub fn move_cursor_up(&mut self, n: usize) {
        let floor = if self.cursor.row >= self.scroll_top {
            self.scroll_top
        } else {
            0
        };
        self.cursor.row = self.cursor.row.saturating_sub(n).max(floor);
        self.cursor.pending_wrap = false;
    }

    pub fn move_cursor_down(&mut self, n: usize) {
        let ceiling = if self.cursor.row <= self.scroll_bottom {
            self.scroll_bottom
        } else {
            self.height - 1
        };
        self.cursor.row = (self.cursor.row + n).min(ceiling);
        self.cursor.pending_wrap = false;
    }

    pub fn move_cursor_forward(&mut self, n: usize) {
        self.cursor.col = (self.cursor.col + n).min(self.width - 1);
        self.cursor.pending_wrap = false;
    }

    pub fn move_cursor_backward(&mut self, n: usize) {
        self.cursor.col = self.cursor.col.saturating_sub(n);
        self.cursor.pending_wrap = false;
    }

    /// Absolute position (CUP/HVP), 0-indexed
    pub fn move_cursor_to(&mut self, row: usize, col: usize) {
        self.cursor.row = row.min(self.height - 1);
        self.cursor.col = col.min(self.width - 1);
        self.cursor.pending_wrap = false;
    }

    pub fn move_cursor_to_col(&mut self, col: usize) {
        self.cursor.col = col.min(self.width - 1);
        self.cursor.pending_wrap = false;
    }

    pub fn move_cursor_to_row(&mut self, row: usize) {
        self.cursor.row = row.min(self.height - 1);
        self.cursor.pending_wrap = false;
    }

    /// DECSC / CSI s
    pub fn save_cursor(&mut self) {
        self.saved_cursor = Some(SavedCursor {
            col: self.cursor.col,
            row: self.cursor.row,
            pen: self.pen,
        });
    }

    /// DECRC / CSI u
    pub fn restore_cursor(&mut self) {
        let saved = self.saved_cursor.unwrap_or_default();
        self.cursor.col = saved.col.min(self.width - 1);
        self.cursor.row = saved.row.min(self.height - 1);
        self.cursor.pending_wrap = false;
        self.pen = saved.pen;
    }

    // ------------------------------------------------------------------
    // Scrolling
    // ------------------------------------------------------------------

    /// Scroll the region up by n lines (content moves up, blanks at bottom)
    pub fn scroll_up(&mut self, n: usize) {
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);
        let n = n.min(bottom - top + 1);
        if n == 0 {
            return;
        }
        let width = self.width;
        self.grid.drain(top..top + n);
        for _ in 0..n {
            self.grid.insert(bottom + 1 - n, blank_row(width));
        }
    }

    /// Scroll the region down by n lines (content moves down, blanks at top)
    pub fn scroll_down(&mut self, n: usize) {
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);
        let n = n.min(bottom - top + 1);
        if n == 0 {
            return;
        }
        let width = self.width;
        self.grid.drain(bottom + 1 - n..=bottom);
        for _ in 0..n {
            self.grid.insert(top, blank_row(width));
        }
    }

    /// Set scroll region (DECSTBM), 0-indexed inclusive. Homes the cursor.
    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let top = top.min(self.height - 1);
        let bottom = bottom.min(self.height - 1);
        if top < bottom {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
        } else {
            self.reset_scroll_region();
        }
        self.move_cursor_to(0, 0);
    }

    pub fn reset_scroll_region(&mut self) {
        self.scroll_top = 0;
        self.scroll_bottom = self.height - 1;
    }

    // ------------------------------------------------------------------
    // Erasing, inserting and deleting
    // ------------------------------------------------------------------

    /// Erase in display (ED)
    pub fn erase_in_display(&mut self, mode: u16) {
        let (col, row) = (self.cursor.col, self.cursor.row);
        match mode {
            0 => {
                self.erase_cells(row, col, self.width);
                for r in row + 1..self.height {
                    self.erase_cells(r, 0, self.width);
                }
            }
            1 => {
                for r in 0..row {
                    self.erase_cells(r, 0, self.width);
                }
                self.erase_cells(row, 0, col + 1);
            }
            2 | 3 => {
                for r in 0..self.height {
                    self.erase_cells(r, 0, self.width);
                }
            }
            _ => {}
        }
    }

    /// Erase in line (EL)
    pub fn erase_in_line(&mut self, mode: u16) {
        let (col, row) = (self.cursor.col, self.cursor.row);
        match mode {
            0 => self.erase_cells(row, col, self.width),
            1 => self.erase_cells(row, 0, col + 1),
            2 => self.erase_cells(row, 0, self.width),
            _ => {}
        }
    }

    /// Erase characters (ECH)
    pub fn erase_chars(&mut self, n: usize) {
        let (col, row) = (self.cursor.col, self.cursor.row);
        self.erase_cells(row, col, col.saturating_add(n));
        self.cursor.pending_wrap = false;
    }

    fn erase_cells(&mut self, row: usize, from: usize, to: usize) {
        let bg = self.pen.bg;
        let width = self.width;
        if let Some(line) = self.grid.get_mut(row) {
            for cell in line.iter_mut().take(to.min(width)).skip(from) {
                cell.erase(bg);
            }
            normalize_row(line);
        }
    }

    /// Insert blank lines at the cursor row (IL)
    pub fn insert_lines(&mut self, n: usize) {
        let row = self.cursor.row;
        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }
        let n = n.min(self.scroll_bottom - row + 1);
        let width = self.width;
        self.grid.drain(self.scroll_bottom + 1 - n..=self.scroll_bottom);
        for _ in 0..n {
            self.grid.insert(row, blank_row(width));
        }
        self.cursor.carriage_return();
    }

    /// Delete lines at the cursor row (DL)
    pub fn delete_lines(&mut self, n: usize) {
        let row = self.cursor.row;
        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }
        let n = n.min(self.scroll_bottom - row + 1);
        let width = self.width;
        self.grid.drain(row..row + n);
        for _ in 0..n {
            self.grid.insert(self.scroll_bottom + 1 - n, blank_row(width));
        }
        self.cursor.carriage_return();
    }

    /// Insert blank characters at the cursor (ICH)
    pub fn insert_chars(&mut self, n: usize) {
        let (col, row) = (self.cursor.col, self.cursor.row);
        let width = self.width;
        let line = &mut self.grid[row];
        let n = n.min(width - col);
        line.truncate(width - n);
        for _ in 0..n {
            line.insert(col, Cell::default());
        }
        normalize_row(line);
        self.cursor.pending_wrap = false;
    }

    /// Delete characters at the cursor (DCH)
    pub fn delete_chars(&mut self, n: usize) {
        let (col, row) = (self.cursor.col, self.cursor.row);
        let width = self.width;
        let line = &mut self.grid[row];
        let n = n.min(width - col);
        line.drain(col..col + n);
        line.resize(width, Cell::default());
        normalize_row(line);
        self.cursor.pending_wrap = false;
    }

    // ------------------------------------------------------------------
    // Alternate screen
    // ------------------------------------------------------------------

    /// Switch to a fresh alternate grid, stashing the primary grid and cursor
    pub fn enter_alternate_screen(&mut self) {
        if self.primary_stash.is_some() {
            return;
        }
        let fresh = (0..self.height).map(|_| blank_row(self.width)).collect();
        let primary = std::mem::replace(&mut self.grid, fresh);
        self.primary_stash = Some((primary, self.cursor));
    }

    /// Return to the primary grid
    pub fn exit_alternate_screen(&mut self) {
        if let Some((primary, cursor)) = self.primary_stash.take() {
            self.grid = primary;
            self.cursor = cursor;
        }
    }

    /// Clear the active grid (used when entering alternate screen with ?1049)
    pub fn clear(&mut self) {
        for row in self.grid.iter_mut() {
            row.iter_mut().for_each(Cell::clear);
        }
    }
}

fn row_text(row: &[Cell]) -> String {
    let mut text: String = row
        .iter()
        .filter(|cell| !cell.wide_continuation)
        .map(|cell| cell.ch)
        .collect();
    let trimmed = text.trim_end_matches(' ').len();
    text.truncate(trimmed);
    text
}

fn resize_grid(grid: &[Vec<Cell>], width: usize, height: usize) -> Vec<Vec<Cell>> {
    (0..height)
        .map(|y| {
            let mut row = blank_row(width);
            if let Some(old) = grid.get(y) {
                let overlap = old.len().min(width);
                row[..overlap].copy_from_slice(&old[..overlap]);
                normalize_row(&mut row);
            }
            row
        })
        .collect()
}

impl fmt::Display for ScreenBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (y, row) in self.grid.iter().enumerate() {
            if y > 0 {
                f.write_str("\n")?;
            }
            f.write_str(&row_text(row))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Color;

    #[test]
    fn test_dimensions_clamped_to_limits() {
        let mut screen = ScreenBuffer::new(MAX_COLS * 4, 0);
        assert_eq!((screen.width(), screen.height()), (MAX_COLS, 1));

        screen.resize(3, usize::MAX);
        assert_eq!((screen.width(), screen.height()), (3, MAX_ROWS));
    }

    #[test]
    fn test_screen_new() {
        let screen = ScreenBuffer::new(80, 24);
        assert_eq!(screen.width(), 80);
        assert_eq!(screen.height(), 24);
        assert_eq!(screen.cursor().col, 0);
        assert_eq!(screen.cursor().row, 0);
    }

    #[test]
    fn test_screen_new_clamps_zero() {
        let screen = ScreenBuffer::new(0, 0);
        assert_eq!((screen.width(), screen.height()), (1, 1));
    }

    #[test]
    fn test_print_char() {
        let mut screen = ScreenBuffer::new(80, 24);
        screen.print('A');
        assert_eq!(screen.get(0, 0), 'A');
        assert_eq!(screen.cursor().col, 1);
    }

    #[test]
    fn test_print_uses_pen() {
        let mut screen = ScreenBuffer::new(10, 2);
        screen.pen_mut().fg = Color::GREEN;
        screen.pen_mut().style.bold = true;
        screen.print('x');
        let cell = screen.cell(0, 0).unwrap();
        assert_eq!(cell.fg, Color::GREEN);
        assert!(cell.style.bold);
    }

    #[test]
    fn test_autowrap() {
        let mut screen = ScreenBuffer::new(5, 3);
        for c in "HelloWorld".chars() {
            screen.print(c);
        }
        assert_eq!(screen.get_line(0), "Hello");
        assert_eq!(screen.get_line(1), "World");
    }

    #[test]
    fn test_pending_wrap_then_cr() {
        let mut screen = ScreenBuffer::new(3, 2);
        for c in "abc".chars() {
            screen.print(c);
        }
        assert!(screen.cursor().pending_wrap);
        screen.carriage_return();
        screen.print('X');
        assert_eq!(screen.get_line(0), "Xbc");
    }

    #[test]
    fn test_linefeed_scrolls_at_bottom() {
        let mut screen = ScreenBuffer::new(10, 3);
        screen.set_line(0, "one");
        screen.set_line(1, "two");
        screen.set_line(2, "three");
        screen.move_cursor_to(2, 0);
        screen.linefeed();
        assert_eq!(screen.get_line(0), "two");
        assert_eq!(screen.get_line(1), "three");
        assert_eq!(screen.get_line(2), "");
    }

    #[test]
    fn test_scroll_region() {
        let mut screen = ScreenBuffer::new(10, 4);
        for (i, text) in ["a", "b", "c", "d"].iter().enumerate() {
            screen.set_line(i, text);
        }
        screen.set_scroll_region(1, 2);
        screen.scroll_up(1);
        assert_eq!(screen.to_string(), "a\nc\n\nd");
    }

    #[test]
    fn test_erase_in_line() {
        let mut screen = ScreenBuffer::new(10, 1);
        screen.set_line(0, "abcdefghij");
        screen.move_cursor_to(0, 4);
        screen.erase_in_line(0);
        assert_eq!(screen.get_line(0), "abcd");
        screen.erase_in_line(1);
        assert_eq!(screen.get_line(0), "");
    }

    #[test]
    fn test_erase_in_display_all() {
        let mut screen = ScreenBuffer::new(5, 2);
        screen.set_line(0, "hello");
        screen.set_line(1, "world");
        screen.erase_in_display(2);
        assert_eq!(screen.to_string(), "\n");
    }

    #[test]
    fn test_insert_and_delete_chars() {
        let mut screen = ScreenBuffer::new(6, 1);
        screen.set_line(0, "abcdef");
        screen.move_cursor_to(0, 2);
        screen.insert_chars(2);
        assert_eq!(screen.get_line(0), "ab  cd");
        screen.delete_chars(2);
        assert_eq!(screen.get_line(0), "abcd");
    }

    #[test]
    fn test_insert_and_delete_lines() {
        let mut screen = ScreenBuffer::new(5, 3);
        screen.set_line(0, "1");
        screen.set_line(1, "2");
        screen.set_line(2, "3");
        screen.move_cursor_to(1, 0);
        screen.insert_lines(1);
        assert_eq!(screen.to_string(), "1\n\n2");
        screen.delete_lines(1);
        assert_eq!(screen.to_string(), "1\n2\n");
    }

    #[test]
    fn test_tab_stops() {
        let mut screen = ScreenBuffer::new(20, 1);
        screen.tab();
        assert_eq!(screen.cursor().col, 8);
        screen.tab();
        assert_eq!(screen.cursor().col, 16);
        screen.tab();
        assert_eq!(screen.cursor().col, 19);
    }

    #[test]
    fn test_wide_char_occupies_two_cells() {
        let mut screen = ScreenBuffer::new(6, 1);
        screen.print('世');
        screen.print('x');
        assert_eq!(screen.cursor().col, 3);
        assert!(screen.cell(1, 0).unwrap().wide_continuation);
        assert_eq!(screen.get_line(0), "世x");
    }

    #[test]
    fn test_overwriting_half_of_wide_char_blanks_other_half() {
        let mut screen = ScreenBuffer::new(6, 1);
        screen.print('世');
        screen.move_cursor_to(0, 1);
        screen.print('y');
        assert_eq!(screen.get_line(0), " y");
        assert!(!screen.cell(1, 0).unwrap().wide_continuation);
    }

    #[test]
    fn test_alternate_screen_round_trip() {
        let mut screen = ScreenBuffer::new(10, 2);
        screen.set_line(0, "primary");
        screen.enter_alternate_screen();
        assert!(screen.is_alternate());
        assert_eq!(screen.get_line(0), "");
        screen.print('z');
        screen.exit_alternate_screen();
        assert_eq!(screen.get_line(0), "primary");
    }

    #[test]
    fn test_save_restore_cursor() {
        let mut screen = ScreenBuffer::new(10, 5);
        screen.move_cursor_to(3, 4);
        screen.pen_mut().style.italic = true;
        screen.save_cursor();
        screen.move_cursor_to(0, 0);
        screen.pen_mut().reset();
        screen.restore_cursor();
        assert_eq!((screen.cursor().row, screen.cursor().col), (3, 4));
        assert!(screen.pen().style.italic);
    }
}
