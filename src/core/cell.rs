//! Terminal Cell
//!
//! Represents a single cell in the screen buffer, containing a character
//! and its associated styling attributes.

use serde::{Deserialize, Serialize};

/// A single cell in the screen grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// The character in this cell. Blank cells hold a space.
    pub ch: char,
    /// Foreground color
    pub fg: Color,
    /// Background color
    pub bg: Color,
    /// Text style attributes
    pub style: Style,
    /// This cell is the right half of the wide character to its left
    pub wide_continuation: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: Color::Default,
            bg: Color::Default,
            style: Style::default(),
            wide_continuation: false,
        }
    }
}

impl Cell {
    /// Create a new unstyled cell with a single character
    pub fn new(ch: char) -> Self {
        Self {
            ch,
            ..Default::default()
        }
    }

    /// Create a new cell with content and pen attributes
    pub fn with_pen(ch: char, pen: &Pen) -> Self {
        Self {
            ch,
            fg: pen.fg,
            bg: pen.bg,
            style: pen.style,
            wide_continuation: false,
        }
    }

    /// A blank, default-styled cell
    pub fn is_blank(&self) -> bool {
        *self == Self::default()
    }

    /// True when both cells render with the same attributes
    pub fn same_attrs(&self, other: &Cell) -> bool {
        self.fg == other.fg && self.bg == other.bg && self.style == other.style
    }

    /// Clear the cell to default state
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Clear the cell but preserve background color (for erase operations)
    pub fn erase(&mut self, bg: Color) {
        self.ch = ' ';
        self.fg = Color::Default;
        self.bg = bg;
        self.style = Style::default();
        self.wide_continuation = false;
    }
}

/// Color representation supporting indexed and RGB colors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Color {
    /// Default terminal color (foreground or background)
    #[default]
    Default,
    /// 256-color palette index (0-15 are the ANSI colors)
    Indexed(u8),
    /// 24-bit RGB color
    Rgb(u8, u8, u8),
}

impl Color {
    /// Standard ANSI colors (0-7)
    pub const BLACK: Color = Color::Indexed(0);
    pub const RED: Color = Color::Indexed(1);
    pub const GREEN: Color = Color::Indexed(2);
    pub const YELLOW: Color = Color::Indexed(3);
    pub const BLUE: Color = Color::Indexed(4);
    pub const MAGENTA: Color = Color::Indexed(5);
    pub const CYAN: Color = Color::Indexed(6);
    pub const WHITE: Color = Color::Indexed(7);

    pub fn is_default(&self) -> bool {
        matches!(self, Color::Default)
    }
}

/// Text style attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Style {
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dim: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub double_underline: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub blink: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub inverse: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strikethrough: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Style {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }
}

/// The attributes applied to newly printed characters (SGR state)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pen {
    pub fg: Color,
    pub bg: Color,
    pub style: Style,
}

impl Pen {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
