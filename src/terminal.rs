//! Terminal Executor
//!
//! Ties together the parser and the screen buffer, applying parsed actions
//! to update the terminal state. This is the ingestion path for raw PTY
//! output.

use tracing::{debug, trace};

use crate::core::{Color, ScreenBuffer, Snapshot};
use crate::parser::{Action, CsiAction, EscAction, OscAction, Parser};

/// Terminal executor that processes parsed actions and updates the screen
#[derive(Debug)]
pub struct Terminal {
    screen: ScreenBuffer,
    parser: Parser,
    /// Window title (OSC 0/2)
    title: String,
    /// Last printed character, for REP
    last_printed: Option<char>,
}

impl Terminal {
    /// Create a new terminal with the given dimensions
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            screen: ScreenBuffer::new(cols, rows),
            parser: Parser::new(),
            title: String::new(),
            last_printed: None,
        }
    }

    pub fn screen(&self) -> &ScreenBuffer {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut ScreenBuffer {
        &mut self.screen
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Process output bytes from the PTY. Sequences may be split across calls.
    pub fn process(&mut self, data: &[u8]) {
        let actions = self.parser.parse(data);
        for action in actions {
            self.apply_action(action);
        }
    }

    /// Resize the screen, preserving the top-left content
    pub fn resize(&mut self, cols: usize, rows: usize) {
        self.screen.resize(cols, rows);
    }

    /// Capture the visible screen
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.screen)
    }

    /// Replace the screen with the content of a snapshot, keeping the
    /// current dimensions.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        let (cols, rows) = (self.screen.width(), self.screen.height());
        self.screen = snapshot.restore_sized(cols, rows);
        self.parser.reset();
        self.last_printed = None;
    }

    fn apply_action(&mut self, action: Action) {
        match action {
            Action::Print(c) => {
                self.screen.print(c);
                self.last_printed = Some(c);
            }
            Action::Execute(byte) => self.execute_c0(byte),
            Action::CsiDispatch(csi) => self.execute_csi(&csi),
            Action::EscDispatch(esc) => self.execute_esc(esc),
            Action::OscDispatch(osc) => self.execute_osc(osc),
            Action::StringDispatch(data) => {
                trace!(len = data.len(), "string sequence consumed");
            }
        }
    }

    /// Execute a C0 control character
    fn execute_c0(&mut self, byte: u8) {
        match byte {
            0x08 => self.screen.backspace(),
            0x09 => self.screen.tab(),
            // LF, VT, FF
            0x0A..=0x0C => self.screen.linefeed(),
            0x0D => self.screen.carriage_return(),
            // BEL, SO, SI and the rest have no effect on the grid
            _ => {}
        }
    }

    /// Execute a CSI sequence
    fn execute_csi(&mut self, csi: &CsiAction) {
        match csi.marker {
            None => {}
            Some(b'?') => {
                self.execute_csi_private(csi);
                return;
            }
            Some(marker) => {
                debug!(
                    marker = %(marker as char),
                    final_byte = %(csi.final_byte as char),
                    "ignoring CSI with private marker"
                );
                return;
            }
        }

        let n = || csi.param_or_default(0, 1) as usize;

        match (csi.final_byte, csi.intermediates.as_slice()) {
            // Cursor movement
            (b'A', []) => self.screen.move_cursor_up(n()),
            (b'B' | b'e', []) => self.screen.move_cursor_down(n()),
            (b'C' | b'a', []) => self.screen.move_cursor_forward(n()),
            (b'D', []) => self.screen.move_cursor_backward(n()),
            (b'E', []) => {
                // CNL
                self.screen.move_cursor_down(n());
                self.screen.carriage_return();
            }
            (b'F', []) => {
                // CPL
                self.screen.move_cursor_up(n());
                self.screen.carriage_return();
            }
            (b'G' | b'`', []) => self.screen.move_cursor_to_col(n() - 1),
            (b'H' | b'f', []) => {
                let row = csi.param_or_default(0, 1) as usize - 1;
                let col = csi.param_or_default(1, 1) as usize - 1;
                self.screen.move_cursor_to(row, col);
            }
            (b'd', []) => self.screen.move_cursor_to_row(n() - 1),

            // Erase
            (b'J', []) => self.screen.erase_in_display(csi.param(0, 0)),
            (b'K', []) => self.screen.erase_in_line(csi.param(0, 0)),
            (b'X', []) => self.screen.erase_chars(n()),

            // Insert/delete
            (b'L', []) => self.screen.insert_lines(n()),
            (b'M', []) => self.screen.delete_lines(n()),
            (b'@', []) => self.screen.insert_chars(n()),
            (b'P', []) => self.screen.delete_chars(n()),

            // Scroll
            (b'S', []) => self.screen.scroll_up(n()),
            (b'T', []) => self.screen.scroll_down(n()),
            (b'r', []) => {
                // DECSTBM
                let top = csi.param_or_default(0, 1) as usize - 1;
                let bottom = match csi.param(1, 0) {
                    0 => self.screen.height(),
                    v => v as usize,
                };
                self.screen.set_scroll_region(top, bottom.saturating_sub(1));
            }

            (b'm', []) => self.execute_sgr(csi),

            // Tabs
            (b'I', []) => {
                for _ in 0..n() {
                    self.screen.tab();
                }
            }
            (b'g', []) => match csi.param(0, 0) {
                0 => self.screen.clear_tab_stop(),
                3 => self.screen.clear_all_tab_stops(),
                _ => {}
            },

            // SCP/RCP
            (b's', []) if csi.params.is_empty() => self.screen.save_cursor(),
            (b'u', []) if csi.params.is_empty() => self.screen.restore_cursor(),

            // REP
            (b'b', []) => {
                if let Some(c) = self.last_printed {
                    for _ in 0..n().min(self.screen.width() * self.screen.height()) {
                        self.screen.print(c);
                    }
                }
            }

            // DECSTR
            (b'p', [b'!']) => self.soft_reset(),

            _ => {
                debug!(
                    params = ?csi.params,
                    intermediates = ?csi.intermediates,
                    final_byte = %(csi.final_byte as char),
                    "unhandled CSI"
                );
            }
        }
    }

    /// Execute a private CSI sequence (starts with ?)
    fn execute_csi_private(&mut self, csi: &CsiAction) {
        let enable = match csi.final_byte {
            b'h' => true,
            b'l' => false,
            _ => {
                debug!(
                    params = ?csi.params,
                    final_byte = %(csi.final_byte as char),
                    "unhandled private CSI"
                );
                return;
            }
        };
        for mode in csi.values() {
            self.set_dec_mode(mode, enable);
        }
    }

    /// Set or reset a DEC private mode
    fn set_dec_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            // DECAWM
            7 => self.screen.set_autowrap(enable),
            // DECTCEM
            25 => self.screen.cursor_mut().visible = enable,
            47 | 1047 => {
                if enable {
                    self.screen.enter_alternate_screen();
                } else {
                    self.screen.exit_alternate_screen();
                }
            }
            1048 => {
                if enable {
                    self.screen.save_cursor();
                } else {
                    self.screen.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.screen.save_cursor();
                    self.screen.enter_alternate_screen();
                    self.screen.clear();
                } else {
                    self.screen.exit_alternate_screen();
                    self.screen.restore_cursor();
                }
            }
            _ => trace!(mode, enable, "DEC mode has no effect on the grid"),
        }
    }

    /// Execute SGR (Select Graphic Rendition)
    fn execute_sgr(&mut self, csi: &CsiAction) {
        let params = &csi.params;
        let pen = self.screen.pen_mut();
        if params.is_empty() {
            pen.reset();
            return;
        }

        let mut i = 0;
        while i < params.len() {
            let group = &params[i];
            let code = group.first().copied().unwrap_or(0);
            let mut consumed = 1;
            match code {
                0 => pen.reset(),
                1 => pen.style.bold = true,
                2 => pen.style.dim = true,
                3 => pen.style.italic = true,
                4 => {
                    // 4:0 none, 4:2 double, 4:1/3/4/5 drawn as single
                    let (single, double) = match group.get(1) {
                        None => (true, false),
                        Some(0) => (false, false),
                        Some(2) => (false, true),
                        Some(_) => (true, false),
                    };
                    pen.style.underline = single;
                    pen.style.double_underline = double;
                }
                5 | 6 => pen.style.blink = true,
                7 => pen.style.inverse = true,
                8 => pen.style.hidden = true,
                9 => pen.style.strikethrough = true,
                21 => {
                    pen.style.underline = false;
                    pen.style.double_underline = true;
                }
                22 => {
                    pen.style.bold = false;
                    pen.style.dim = false;
                }
                23 => pen.style.italic = false,
                24 => {
                    pen.style.underline = false;
                    pen.style.double_underline = false;
                }
                25 => pen.style.blink = false,
                27 => pen.style.inverse = false,
                28 => pen.style.hidden = false,
                29 => pen.style.strikethrough = false,
                30..=37 => pen.fg = Color::Indexed((code - 30) as u8),
                39 => pen.fg = Color::Default,
                40..=47 => pen.bg = Color::Indexed((code - 40) as u8),
                49 => pen.bg = Color::Default,
                90..=97 => pen.fg = Color::Indexed((code - 90 + 8) as u8),
                100..=107 => pen.bg = Color::Indexed((code - 100 + 8) as u8),
                38 | 48 | 58 => {
                    let (color, used) = extended_color(params, i);
                    consumed = used;
                    match (code, color) {
                        (38, Some(color)) => pen.fg = color,
                        (48, Some(color)) => pen.bg = color,
                        // Underline color is not tracked
                        _ => {}
                    }
                }
                _ => trace!(code, "unhandled SGR attribute"),
            }
            i += consumed;
        }
    }

    /// Execute an ESC sequence
    fn execute_esc(&mut self, esc: EscAction) {
        match esc {
            EscAction::SaveCursor => self.screen.save_cursor(),
            EscAction::RestoreCursor => self.screen.restore_cursor(),
            EscAction::Index => self.screen.linefeed(),
            EscAction::ReverseIndex => self.screen.reverse_index(),
            EscAction::NextLine => self.screen.next_line(),
            EscAction::HorizontalTabSet => self.screen.set_tab_stop(),
            EscAction::FullReset => {
                self.screen.reset();
                self.title.clear();
                self.last_printed = None;
            }
            EscAction::AlignmentTest => {
                for y in 0..self.screen.height() {
                    for x in 0..self.screen.width() {
                        self.screen.set(x, y, 'E');
                    }
                }
                self.screen.move_cursor_to(0, 0);
            }
            EscAction::StringTerminator | EscAction::DesignateCharset { .. } => {}
            EscAction::Unknown(bytes) => debug!(?bytes, "unknown ESC sequence"),
        }
    }

    fn execute_osc(&mut self, osc: OscAction) {
        match osc {
            OscAction::SetTitle(title) => self.title = title,
            OscAction::Other { command, data } => {
                trace!(command, len = data.len(), "OSC consumed");
            }
        }
    }

    /// Soft terminal reset (DECSTR)
    fn soft_reset(&mut self) {
        self.screen.pen_mut().reset();
        self.screen.reset_scroll_region();
        self.screen.set_autowrap(true);
        self.screen.cursor_mut().visible = true;
    }
}

/// Decode an extended color starting at parameter group `i`.
///
/// Accepts both the colon form (`38:5:n`, `38:2:r:g:b`, `38:2:cs:r:g:b`)
/// and the semicolon form (`38;5;n`, `38;2;r;g;b`). Returns the color, if
/// well-formed, and the number of parameter groups consumed.
fn extended_color(params: &[Vec<u16>], i: usize) -> (Option<Color>, usize) {
    let clamp = |v: u16| v.min(255) as u8;
    let group = &params[i];

    if group.len() > 1 {
        let color = match &group[1..] {
            [5, n, ..] => Some(Color::Indexed(clamp(*n))),
            [2, _, r, g, b, ..] => Some(Color::Rgb(clamp(*r), clamp(*g), clamp(*b))),
            [2, r, g, b] => Some(Color::Rgb(clamp(*r), clamp(*g), clamp(*b))),
            _ => None,
        };
        return (color, 1);
    }

    let value = |k: usize| params.get(i + k).and_then(|g| g.first()).copied();
    match value(1) {
        Some(5) => match value(2) {
            Some(n) => (Some(Color::Indexed(clamp(n))), 3),
            None => (None, params.len() - i),
        },
        Some(2) => match (value(2), value(3), value(4)) {
            (Some(r), Some(g), Some(b)) => (Some(Color::Rgb(clamp(r), clamp(g), clamp(b))), 5),
            _ => (None, params.len() - i),
        },
        _ => (None, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_print() {
        let mut term = Terminal::new(80, 24);
        term.process(b"Hello, World!");
        assert_eq!(term.screen().get_line(0), "Hello, World!");
    }

    #[test]
    fn test_terminal_cursor_movement() {
        let mut term = Terminal::new(80, 24);
        term.process(b"\x1b[10;5HX");
        assert_eq!(term.screen().cursor().row, 9);
        assert_eq!(term.screen().cursor().col, 5);
        assert_eq!(term.screen().get(4, 9), 'X');
    }

    #[test]
    fn test_terminal_crlf() {
        let mut term = Terminal::new(20, 3);
        term.process(b"one\r\ntwo\r\n");
        assert_eq!(term.screen().to_string(), "one\ntwo\n");
        assert_eq!(term.screen().cursor().row, 2);
    }

    #[test]
    fn test_terminal_colors() {
        let mut term = Terminal::new(80, 24);
        term.process(b"\x1b[31;44mColored");
        assert_eq!(term.screen().pen().fg, Color::RED);
        assert_eq!(term.screen().pen().bg, Color::BLUE);
        assert_eq!(term.screen().cell(0, 0).unwrap().fg, Color::RED);
    }

    #[test]
    fn test_terminal_bright_colors() {
        let mut term = Terminal::new(80, 24);
        term.process(b"\x1b[91;102m");
        assert_eq!(term.screen().pen().fg, Color::Indexed(9));
        assert_eq!(term.screen().pen().bg, Color::Indexed(10));
    }

    #[test]
    fn test_terminal_sgr_reset() {
        let mut term = Terminal::new(80, 24);
        term.process(b"\x1b[1;31mBold Red\x1b[0mNormal");
        assert_eq!(term.screen().pen().fg, Color::Default);
        assert!(!term.screen().pen().style.bold);
        assert!(term.screen().cell(0, 0).unwrap().style.bold);
        assert!(!term.screen().cell(8, 0).unwrap().style.bold);
    }

    #[test]
    fn test_terminal_truecolor_semicolon_and_colon() {
        let mut term = Terminal::new(80, 24);
        term.process(b"\x1b[38;2;255;128;64m");
        assert_eq!(term.screen().pen().fg, Color::Rgb(255, 128, 64));

        term.process(b"\x1b[48:2::1:2:3m");
        assert_eq!(term.screen().pen().bg, Color::Rgb(1, 2, 3));

        term.process(b"\x1b[38:5:200;1m");
        assert_eq!(term.screen().pen().fg, Color::Indexed(200));
        assert!(term.screen().pen().style.bold);
    }

    #[test]
    fn test_terminal_underline_subparams() {
        let mut term = Terminal::new(80, 24);
        term.process(b"\x1b[4:2m");
        assert!(term.screen().pen().style.double_underline);
        assert!(!term.screen().pen().style.underline);

        term.process(b"\x1b[4:3m");
        assert!(term.screen().pen().style.underline);

        term.process(b"\x1b[4:0m");
        assert!(!term.screen().pen().style.underline);
        assert!(!term.screen().pen().style.double_underline);
    }

    #[test]
    fn test_terminal_modify_other_keys_is_not_sgr() {
        let mut term = Terminal::new(80, 24);
        term.process(b"\x1b[>4;1m");
        assert!(!term.screen().pen().style.underline);
        assert!(!term.screen().pen().style.bold);
    }

    #[test]
    fn test_terminal_erase() {
        let mut term = Terminal::new(10, 3);
        term.process(b"XXXXXXXXXX");
        term.process(b"\x1b[1;5H\x1b[K");
        assert_eq!(term.screen().get_line(0), "XXXX");
    }

    #[test]
    fn test_terminal_clear_screen() {
        let mut term = Terminal::new(10, 3);
        term.process(b"abc\r\ndef\x1b[2J\x1b[H");
        assert_eq!(term.screen().to_string(), "\n\n");
        assert_eq!(term.screen().cursor().row, 0);
    }

    #[test]
    fn test_terminal_scroll_region() {
        let mut term = Terminal::new(80, 5);
        term.process(b"\x1b[2;4r");
        assert_eq!(term.screen().scroll_top(), 1);
        assert_eq!(term.screen().scroll_bottom(), 3);
    }

    #[test]
    fn test_terminal_alternate_screen() {
        let mut term = Terminal::new(80, 24);
        term.process(b"Primary");
        term.process(b"\x1b[?1049h\x1b[H");
        term.process(b"Alternate");
        assert!(term.screen().is_alternate());
        assert_eq!(term.screen().get_line(0), "Alternate");

        term.process(b"\x1b[?1049l");
        assert!(!term.screen().is_alternate());
        assert_eq!(term.screen().get_line(0), "Primary");
        assert_eq!(term.screen().cursor().col, 7);
    }

    #[test]
    fn test_terminal_title() {
        let mut term = Terminal::new(80, 24);
        term.process(b"\x1b]0;My Terminal Title\x07");
        assert_eq!(term.title(), "My Terminal Title");
        assert_eq!(term.screen().get_line(0), "");
    }

    #[test]
    fn test_terminal_insert_delete_lines() {
        let mut term = Terminal::new(10, 5);
        term.process(b"Line 1\r\nLine 2\r\nLine 3\r\nLine 4\r\nLine 5");
        term.process(b"\x1b[2;1H\x1b[L");
        assert_eq!(term.screen().get_line(0), "Line 1");
        assert_eq!(term.screen().get_line(1), "");
        assert_eq!(term.screen().get_line(2), "Line 2");
        assert_eq!(term.screen().get_line(4), "Line 4");

        term.process(b"\x1b[2M");
        assert_eq!(term.screen().get_line(1), "Line 3");
    }

    #[test]
    fn test_terminal_split_escape_across_chunks() {
        let mut term = Terminal::new(20, 2);
        term.process(b"\x1b[3");
        term.process(b"1mred\x1b");
        term.process(b"[0m");
        assert_eq!(term.screen().get_line(0), "red");
        assert_eq!(term.screen().cell(0, 0).unwrap().fg, Color::RED);
        assert_eq!(term.screen().pen().fg, Color::Default);
    }

    #[test]
    fn test_terminal_repeat() {
        let mut term = Terminal::new(20, 2);
        term.process(b"a\x1b[4b");
        assert_eq!(term.screen().get_line(0), "aaaaa");
    }

    #[test]
    fn test_terminal_restore_keeps_dimensions() {
        let mut source = Terminal::new(30, 4);
        source.process(b"\x1b[1mbold\x1b[0m plain");
        let snapshot = source.snapshot();

        let mut target = Terminal::new(10, 2);
        target.restore(&snapshot);
        assert_eq!(target.screen().width(), 10);
        assert_eq!(target.screen().get_line(0), "bold plain");
        assert!(target.screen().cell(0, 0).unwrap().style.bold);
    }

    #[test]
    fn test_terminal_restore_ignores_snapshot_size() {
        let snapshot = Snapshot {
            cols: 1 << 40,
            rows: 1,
            cursor: crate::core::CursorPosition { col: 5, row: 0 },
            lines: vec![],
        };
        let mut term = Terminal::new(80, 24);
        term.restore(&snapshot);
        assert_eq!((term.screen().width(), term.screen().height()), (80, 24));
        assert_eq!(term.screen().cursor().col, 5);
    }
}
