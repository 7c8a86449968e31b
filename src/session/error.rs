//! Session registry errors

use thiserror::Error;

use crate::pty::PtyError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("PTY not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] PtyError),

    #[error("Cannot write to PTY {pty_id}: {reason}")]
    Write { pty_id: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
