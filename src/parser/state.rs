//! Parser State Machine
//!
//! Implements a VT500-series compatible parser state machine.
//! The parser handles arbitrary chunk boundaries and produces
//! semantic actions for the terminal executor.
//!
//! # State Machine
//!
//! The parser follows the state machine model described in:
//! - "A parser for DEC's ANSI-compatible video terminals" by Paul Williams
//! - https://vt100.net/emu/dec_ansi_parser
//!
//! States:
//! - Ground: Normal text processing (UTF-8 decoded)
//! - Escape: After ESC, waiting for next byte
//! - EscapeIntermediate: ESC followed by intermediate bytes
//! - CsiEntry: After CSI (ESC [), collecting parameters
//! - CsiParam: Collecting CSI parameters
//! - CsiIntermediate: CSI with intermediate bytes
//! - CsiIgnore: Malformed CSI, consumed until the final byte
//! - OscString: Collecting OSC payload
//! - DcsString: DCS/SOS/PM/APC payload, consumed until ST
//!
//! The input is assumed to be UTF-8, so 8-bit C1 controls are not
//! recognised: bytes >= 0x80 in ground state are decoded as UTF-8 and bytes
//! >= 0x80 inside strings are payload.

use super::action::{Action, CsiAction, EscAction, OscAction};

/// Upper bound on CSI parameter groups and OSC/DCS payloads
const MAX_PARAMS: usize = 32;
const MAX_STRING: usize = 64 * 1024;

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    OscString,
    DcsString,
}

/// The terminal parser
#[derive(Debug)]
pub struct Parser {
    state: State,
    /// Intermediate bytes collected during parsing
    intermediates: Vec<u8>,
    /// Completed CSI parameter groups
    params: Vec<Vec<u16>>,
    /// Group being built (colon separated values)
    current_group: Vec<u16>,
    /// Current parameter value being built
    current_param: u32,
    /// Whether any parameter byte has been seen
    has_params: bool,
    /// Private marker (? > < =)
    marker: Option<u8>,
    /// OSC payload
    osc_string: Vec<u8>,
    /// DCS/SOS/PM/APC payload
    dcs_string: Vec<u8>,
    /// UTF-8 decoder state
    utf8_buffer: Vec<u8>,
    utf8_remaining: u8,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a new parser in the ground state
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            intermediates: Vec::with_capacity(4),
            params: Vec::with_capacity(16),
            current_group: Vec::with_capacity(4),
            current_param: 0,
            has_params: false,
            marker: None,
            osc_string: Vec::with_capacity(256),
            dcs_string: Vec::new(),
            utf8_buffer: Vec::with_capacity(4),
            utf8_remaining: 0,
        }
    }

    /// Reset the parser to initial state
    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.clear_params();
        self.osc_string.clear();
        self.dcs_string.clear();
        self.utf8_buffer.clear();
        self.utf8_remaining = 0;
    }

    fn clear_params(&mut self) {
        self.intermediates.clear();
        self.params.clear();
        self.current_group.clear();
        self.current_param = 0;
        self.has_params = false;
        self.marker = None;
    }

    /// Process a chunk of bytes, returning actions
    pub fn parse(&mut self, data: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();
        for &byte in data {
            self.process_byte(byte, &mut actions);
        }
        actions
    }

    fn process_byte(&mut self, byte: u8, out: &mut Vec<Action>) {
        if self.utf8_remaining > 0 {
            if (0x80..=0xBF).contains(&byte) {
                self.process_utf8_continuation(byte, out);
                return;
            }
            // Truncated sequence: emit a replacement and handle the byte normally
            self.utf8_buffer.clear();
            self.utf8_remaining = 0;
            out.push(Action::Print('\u{FFFD}'));
        }

        if byte < 0x20 {
            self.process_c0(byte, out);
            return;
        }

        match self.state {
            State::Ground => self.process_ground(byte, out),
            State::Escape => self.process_escape(byte, out),
            State::EscapeIntermediate => self.process_escape_intermediate(byte, out),
            State::CsiEntry => self.process_csi_entry(byte, out),
            State::CsiParam => self.process_csi_param(byte, out),
            State::CsiIntermediate => self.process_csi_intermediate(byte, out),
            State::CsiIgnore => {
                if (0x40..=0x7E).contains(&byte) {
                    self.state = State::Ground;
                }
            }
            State::OscString => {
                if self.osc_string.len() < MAX_STRING {
                    self.osc_string.push(byte);
                }
            }
            State::DcsString => {
                if self.dcs_string.len() < MAX_STRING {
                    self.dcs_string.push(byte);
                }
            }
        }
    }

    /// Process C0 control characters (0x00-0x1F)
    fn process_c0(&mut self, byte: u8, out: &mut Vec<Action>) {
        match byte {
            // CAN, SUB - cancel current sequence
            0x18 | 0x1A => {
                self.state = State::Ground;
            }
            0x1B => {
                // ESC inside a string starts its terminator (ESC \)
                self.terminate_string(out);
                self.state = State::Escape;
                self.clear_params();
            }
            // BEL terminates OSC (xterm extension)
            0x07 if self.state == State::OscString => self.terminate_string(out),
            _ => match self.state {
                State::OscString | State::DcsString => {}
                _ => out.push(Action::Execute(byte)),
            },
        }
    }

    /// Process bytes in ground state (normal text)
    fn process_ground(&mut self, byte: u8, out: &mut Vec<Action>) {
        match byte {
            0x7F => {}
            0x20..=0x7E => out.push(Action::Print(byte as char)),
            0xC2..=0xDF => self.start_utf8(byte, 1),
            0xE0..=0xEF => self.start_utf8(byte, 2),
            0xF0..=0xF4 => self.start_utf8(byte, 3),
            // Stray continuation or invalid lead byte
            _ => out.push(Action::Print('\u{FFFD}')),
        }
    }

    fn start_utf8(&mut self, byte: u8, remaining: u8) {
        self.utf8_buffer.clear();
        self.utf8_buffer.push(byte);
        self.utf8_remaining = remaining;
    }

    fn process_utf8_continuation(&mut self, byte: u8, out: &mut Vec<Action>) {
        self.utf8_buffer.push(byte);
        self.utf8_remaining -= 1;
        if self.utf8_remaining == 0 {
            // Rejects overlong encodings and surrogates
            let c = std::str::from_utf8(&self.utf8_buffer)
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or('\u{FFFD}');
            self.utf8_buffer.clear();
            out.push(Action::Print(c));
        }
    }

    /// Process bytes in escape state
    fn process_escape(&mut self, byte: u8, out: &mut Vec<Action>) {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = State::EscapeIntermediate;
            }
            // CSI (ESC [)
            b'[' => {
                self.state = State::CsiEntry;
                self.clear_params();
            }
            // OSC (ESC ])
            b']' => {
                self.state = State::OscString;
                self.osc_string.clear();
            }
            // DCS (ESC P), SOS (ESC X), PM (ESC ^), APC (ESC _)
            b'P' | b'X' | b'^' | b'_' => {
                self.state = State::DcsString;
                self.dcs_string.clear();
            }
            0x30..=0x7E => {
                self.state = State::Ground;
                out.push(self.dispatch_esc(byte));
            }
            _ => self.state = State::Ground,
        }
    }

    fn process_escape_intermediate(&mut self, byte: u8, out: &mut Vec<Action>) {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            0x30..=0x7E => {
                self.state = State::Ground;
                out.push(self.dispatch_esc(byte));
            }
            _ => self.state = State::Ground,
        }
    }

    fn dispatch_esc(&mut self, final_byte: u8) -> Action {
        let action = match self.intermediates.as_slice() {
            [] => match final_byte {
                b'7' => EscAction::SaveCursor,
                b'8' => EscAction::RestoreCursor,
                b'D' => EscAction::Index,
                b'M' => EscAction::ReverseIndex,
                b'E' => EscAction::NextLine,
                b'H' => EscAction::HorizontalTabSet,
                b'c' => EscAction::FullReset,
                b'\\' => EscAction::StringTerminator,
                _ => EscAction::Unknown(vec![final_byte]),
            },
            [slot @ (b'(' | b')' | b'*' | b'+')] => EscAction::DesignateCharset {
                slot: *slot,
                charset: final_byte,
            },
            [b'#'] if final_byte == b'8' => EscAction::AlignmentTest,
            other => {
                let mut seq = other.to_vec();
                seq.push(final_byte);
                EscAction::Unknown(seq)
            }
        };
        Action::EscDispatch(action)
    }

    /// Process bytes in CSI entry state
    fn process_csi_entry(&mut self, byte: u8, out: &mut Vec<Action>) {
        match byte {
            b'?' | b'>' | b'<' | b'=' => {
                self.marker = Some(byte);
                self.state = State::CsiParam;
            }
            _ => {
                self.state = State::CsiParam;
                self.process_csi_param(byte, out);
            }
        }
    }

    /// Process bytes in CSI param state
    fn process_csi_param(&mut self, byte: u8, out: &mut Vec<Action>) {
        match byte {
            b'0'..=b'9' => {
                self.current_param = self
                    .current_param
                    .saturating_mul(10)
                    .saturating_add((byte - b'0') as u32);
                self.has_params = true;
            }
            b':' => {
                self.push_subparam();
                self.has_params = true;
            }
            b';' => {
                self.push_group();
                self.has_params = true;
            }
            0x20..=0x2F => {
                self.finish_params();
                self.intermediates.push(byte);
                self.state = State::CsiIntermediate;
            }
            0x40..=0x7E => {
                self.finish_params();
                self.state = State::Ground;
                out.push(self.dispatch_csi(byte));
            }
            // Private markers in wrong position, DEL
            _ => self.state = State::CsiIgnore,
        }
    }

    fn process_csi_intermediate(&mut self, byte: u8, out: &mut Vec<Action>) {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            0x40..=0x7E => {
                self.state = State::Ground;
                out.push(self.dispatch_csi(byte));
            }
            _ => self.state = State::CsiIgnore,
        }
    }

    fn push_subparam(&mut self) {
        let value = self.current_param.min(u16::MAX as u32) as u16;
        self.current_group.push(value);
        self.current_param = 0;
    }

    fn push_group(&mut self) {
        self.push_subparam();
        let group = std::mem::take(&mut self.current_group);
        if self.params.len() < MAX_PARAMS {
            self.params.push(group);
        }
    }

    fn finish_params(&mut self) {
        if self.has_params {
            self.push_group();
            self.has_params = false;
        }
    }

    fn dispatch_csi(&mut self, final_byte: u8) -> Action {
        Action::CsiDispatch(CsiAction {
            params: std::mem::take(&mut self.params),
            intermediates: std::mem::take(&mut self.intermediates),
            final_byte,
            marker: self.marker.take(),
        })
    }

    /// Finish an OSC or DCS string (BEL or ESC received)
    fn terminate_string(&mut self, out: &mut Vec<Action>) {
        match self.state {
            State::OscString => {
                self.state = State::Ground;
                out.push(Action::OscDispatch(self.parse_osc()));
            }
            State::DcsString => {
                self.state = State::Ground;
                out.push(Action::StringDispatch(std::mem::take(&mut self.dcs_string)));
            }
            _ => {}
        }
    }

    fn parse_osc(&mut self) -> OscAction {
        let payload = String::from_utf8_lossy(&self.osc_string).into_owned();
        self.osc_string.clear();

        let (command, data) = match payload.split_once(';') {
            Some((command, data)) => (command, data),
            None => (payload.as_str(), ""),
        };
        match command.parse::<u32>() {
            Ok(0 | 2) => OscAction::SetTitle(data.to_string()),
            Ok(command) => OscAction::Other {
                command,
                data: data.to_string(),
            },
            Err(_) => OscAction::Other {
                command: 0,
                data: payload.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csi(actions: &[Action]) -> &CsiAction {
        match actions {
            [Action::CsiDispatch(csi)] => csi,
            other => panic!("Expected a single CsiDispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_parser_print() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"Hello");

        assert_eq!(actions.len(), 5);
        assert_eq!(actions[0], Action::Print('H'));
        assert_eq!(actions[4], Action::Print('o'));
    }

    #[test]
    fn test_parser_c0_controls() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"A\nB\rC");

        assert_eq!(
            actions,
            vec![
                Action::Print('A'),
                Action::Execute(b'\n'),
                Action::Print('B'),
                Action::Execute(b'\r'),
                Action::Print('C'),
            ]
        );
    }

    #[test]
    fn test_parser_csi_cursor_up() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b[5A");
        let csi = csi(&actions);
        assert_eq!(csi.params, vec![vec![5]]);
        assert_eq!(csi.final_byte, b'A');
        assert_eq!(csi.marker, None);
    }

    #[test]
    fn test_parser_csi_cup() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b[10;20H");
        assert_eq!(csi(&actions).params, vec![vec![10], vec![20]]);
    }

    #[test]
    fn test_parser_csi_empty_params() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b[H");
        assert!(csi(&actions).params.is_empty());

        let actions = parser.parse(b"\x1b[;5H");
        assert_eq!(csi(&actions).params, vec![vec![0], vec![5]]);
    }

    #[test]
    fn test_parser_csi_private() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b[?1049h");
        let csi = csi(&actions);
        assert_eq!(csi.params, vec![vec![1049]]);
        assert!(csi.is_private());
    }

    #[test]
    fn test_parser_csi_other_marker_is_not_private() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b[>4;1m");
        let csi = csi(&actions);
        assert_eq!(csi.marker, Some(b'>'));
        assert!(!csi.is_private());
    }

    #[test]
    fn test_parser_csi_sgr_subparams() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b[1;4:3;38:2::255:128:0m");
        assert_eq!(
            csi(&actions).params,
            vec![vec![1], vec![4, 3], vec![38, 2, 0, 255, 128, 0]]
        );
    }

    #[test]
    fn test_parser_esc_save_restore() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b7\x1b8");
        assert_eq!(
            actions,
            vec![
                Action::EscDispatch(EscAction::SaveCursor),
                Action::EscDispatch(EscAction::RestoreCursor),
            ]
        );
    }

    #[test]
    fn test_parser_osc_title_bel() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b]0;My Title\x07after");
        assert_eq!(
            actions[0],
            Action::OscDispatch(OscAction::SetTitle("My Title".into()))
        );
        assert_eq!(actions[1], Action::Print('a'));
    }

    #[test]
    fn test_parser_osc_terminated_by_st() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b]8;;https://example.com\x1b\\x");
        assert_eq!(
            actions,
            vec![
                Action::OscDispatch(OscAction::Other {
                    command: 8,
                    data: ";https://example.com".into()
                }),
                Action::EscDispatch(EscAction::StringTerminator),
                Action::Print('x'),
            ]
        );
    }

    #[test]
    fn test_parser_dcs_consumed() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1bPq#0;2;0;0;0\x1b\\ok");
        assert!(matches!(actions[0], Action::StringDispatch(_)));
        assert_eq!(&actions[2..], &[Action::Print('o'), Action::Print('k')]);
    }

    #[test]
    fn test_parser_utf8() {
        let mut parser = Parser::new();
        let actions = parser.parse("Hello 世界".as_bytes());
        assert_eq!(actions.len(), 8);
        assert_eq!(actions[6], Action::Print('世'));
        assert_eq!(actions[7], Action::Print('界'));
    }

    #[test]
    fn test_parser_chunk_boundary() {
        let mut parser = Parser::new();
        assert!(parser.parse(b"\x1b[").is_empty());
        assert!(parser.parse(b"5").is_empty());
        let actions = parser.parse(b"A");
        assert_eq!(csi(&actions).params, vec![vec![5]]);
    }

    #[test]
    fn test_parser_utf8_chunk_boundary() {
        let mut parser = Parser::new();
        // UTF-8 for '世' is E4 B8 96
        assert!(parser.parse(&[0xE4]).is_empty());
        assert!(parser.parse(&[0xB8]).is_empty());
        assert_eq!(parser.parse(&[0x96]), vec![Action::Print('世')]);
    }

    #[test]
    fn test_parser_invalid_utf8_is_replaced() {
        let mut parser = Parser::new();
        let actions = parser.parse(&[0xE4, b'A', 0xFF]);
        assert_eq!(
            actions,
            vec![
                Action::Print('\u{FFFD}'),
                Action::Print('A'),
                Action::Print('\u{FFFD}'),
            ]
        );
    }

    #[test]
    fn test_parser_cancel_sequence() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b[5\x18A");
        assert_eq!(actions, vec![Action::Print('A')]);
    }

    #[test]
    fn test_parser_designate_charset() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b(B\x1b)0");
        assert_eq!(
            actions,
            vec![
                Action::EscDispatch(EscAction::DesignateCharset {
                    slot: b'(',
                    charset: b'B'
                }),
                Action::EscDispatch(EscAction::DesignateCharset {
                    slot: b')',
                    charset: b'0'
                }),
            ]
        );
    }
}
