//! Terminal Core Module
//!
//! Platform-independent screen state. This module contains:
//! - Screen buffer (primary and alternate grids)
//! - Cell representation with attributes
//! - Cursor state and positioning
//! - Snapshot codec
//!
//! The core is deterministic: given the same sequence of operations, it
//! always produces the same state and the same snapshot.

mod cell;
mod cursor;
mod screen;
mod snapshot;

pub use cell::{Cell, Color, Pen, Style};
pub use cursor::{Cursor, SavedCursor};
pub use screen::{ScreenBuffer, MAX_COLS, MAX_ROWS};
pub use snapshot::{CursorPosition, Snapshot, SnapshotError, Token};
