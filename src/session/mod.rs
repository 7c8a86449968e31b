//! PTY sessions
//!
//! A [`Registry`] owns every live PTY. Each [`PtySession`] runs one child
//! process with a reader thread that feeds its screen, its subscribers and
//! its output log.

mod error;
mod registry;
mod session;

pub use error::{Error, Result};
pub use registry::{Registry, RegistryOptions};
pub use session::{CreateRequest, PtyInfo, PtySession, PtyStatus};
