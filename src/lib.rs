//! termhub
//!
//! A PTY session server: spawns processes in pseudoterminals, keeps a
//! rendered screen for each so clients can reconnect from a snapshot, fans
//! live output out to any number of subscribers, and tiles several PTYs
//! into a navigable pane layout.
//!
//! - `core`: Screen buffer, cells, cursor and the snapshot codec
//! - `parser`: VT/xterm escape sequence parser
//! - `terminal`: Applies parsed output to a screen buffer
//! - `pty`: PTY allocation and child processes
//! - `logs`: Rotating per-PTY output logs
//! - `session`: The PTY registry
//! - `stream`: Live output fan-out
//! - `mux`: Pane layout, focus and exit tracking
//! - `server`: HTTP and SSE API
//! - `app`: Configuration

pub mod app;
pub mod core;
pub mod logs;
pub mod mux;
pub mod parser;
pub mod pty;
pub mod server;
pub mod session;
pub mod stream;
pub mod terminal;
