//! Parser Actions
//!
//! Semantic operations produced by the parser that are applied to the screen.

use serde::{Deserialize, Serialize};

/// A terminal action produced by the parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Print a character at the cursor
    Print(char),

    /// Execute a C0 control character (0x00-0x1F except ESC, CAN, SUB)
    Execute(u8),

    /// CSI (Control Sequence Introducer) dispatch
    CsiDispatch(CsiAction),

    /// ESC dispatch (non-CSI escape sequences)
    EscDispatch(EscAction),

    /// OSC (Operating System Command) dispatch
    OscDispatch(OscAction),

    /// DCS, SOS, PM or APC payload. Consumed and ignored by the executor.
    StringDispatch(Vec<u8>),
}

/// A parsed CSI sequence
///
/// Parameters are kept as groups so that colon sub-parameters survive:
/// `CSI 4:3 m` has one group `[4, 3]`, `CSI 4;3 m` has two groups `[4]`
/// and `[3]`. Empty parameters are represented as 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiAction {
    pub params: Vec<Vec<u16>>,
    /// Intermediate bytes (0x20-0x2F)
    pub intermediates: Vec<u8>,
    /// Final byte (0x40-0x7E)
    pub final_byte: u8,
    /// Private marker (`?`, `>`, `<` or `=`)
    pub marker: Option<u8>,
}

impl CsiAction {
    pub fn new(final_byte: u8) -> Self {
        Self {
            params: Vec::new(),
            intermediates: Vec::new(),
            final_byte,
            marker: None,
        }
    }

    /// First value of parameter `index`, or `default` if not present
    pub fn param(&self, index: usize, default: u16) -> u16 {
        self.params
            .get(index)
            .and_then(|group| group.first())
            .copied()
            .unwrap_or(default)
    }

    /// First value of parameter `index`, treating 0 as `default`
    pub fn param_or_default(&self, index: usize, default: u16) -> u16 {
        match self.param(index, 0) {
            0 => default,
            v => v,
        }
    }

    /// Iterator over the first value of every parameter group
    pub fn values(&self) -> impl Iterator<Item = u16> + '_ {
        self.params
            .iter()
            .map(|group| group.first().copied().unwrap_or(0))
    }

    pub fn is_private(&self) -> bool {
        self.marker == Some(b'?')
    }
}

/// OSC actions. Only the title is retained, everything else is consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OscAction {
    /// OSC 0 or OSC 2
    SetTitle(String),
    /// Any other command
    Other { command: u32, data: String },
}

/// ESC sequence actions (non-CSI)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscAction {
    /// ESC 7 (DECSC)
    SaveCursor,
    /// ESC 8 (DECRC)
    RestoreCursor,
    /// ESC D (IND)
    Index,
    /// ESC M (RI)
    ReverseIndex,
    /// ESC E (NEL)
    NextLine,
    /// ESC H (HTS)
    HorizontalTabSet,
    /// ESC c (RIS)
    FullReset,
    /// ESC \ (ST) outside of a string
    StringTerminator,
    /// ESC ( x, ESC ) x, ... charset designation
    DesignateCharset { slot: u8, charset: u8 },
    /// ESC # 8 (DECALN)
    AlignmentTest,
    Unknown(Vec<u8>),
}
