//! Per-PTY output logs
//!
//! Every PTY appends its raw output bytes to `<dir>/<pty id>.log`. When the
//! active file reaches the size limit it is rotated into a bounded chain of
//! backups: `name.1` is the most recent, `name.N` the oldest.
//!
//! Rotation failures never reach the PTY: they are logged and the writer
//! carries on with whatever file it can keep open.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// Size-based rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once the active file holds at least this many bytes
    pub max_bytes: u64,
    /// Backups kept. 0 means the active file is truncated instead.
    pub max_backups: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_backups: 5,
        }
    }
}

/// Internal rotation failure, only ever logged
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("failed to rename {} to {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to reopen {}: {source}", .path.display())]
    Reopen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Appending writer for one log file with size-based rotation
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    policy: RotationPolicy,
    /// Opened lazily on the first write
    file: Option<File>,
    /// Bytes in the active file
    written: u64,
}

impl LogWriter {
    pub fn new(path: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            file: None,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes counted toward the next rotation
    pub fn active_len(&self) -> u64 {
        self.written
    }

    /// Append raw bytes, rotating once the size limit is reached
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let file = self.open()?;
        file.write_all(data)?;
        self.written += data.len() as u64;

        if self.policy.max_bytes > 0 && self.written >= self.policy.max_bytes {
            if let Err(e) = self.rotate() {
                warn!(path = %self.path.display(), error = %e, "log rotation failed");
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    fn open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.written = file.metadata()?.len();
            self.file = Some(file);
        }
        // Populated just above
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file unavailable"))
    }

    /// Path of backup `index` (1-based)
    pub fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> Result<(), RotationError> {
        // Close the active file first
        self.file = None;

        let result = if self.policy.max_backups == 0 {
            Ok(())
        } else {
            self.shift_backups()
        };

        // Whatever happened, keep logging somewhere
        let reopened = match result {
            Ok(()) => OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path),
            Err(_) => OpenOptions::new().create(true).append(true).open(&self.path),
        };
        match reopened {
            Ok(file) => {
                // After a failure, wait another max_bytes before retrying
                self.written = match result {
                    Ok(()) => file.metadata().map(|m| m.len()).unwrap_or(0),
                    Err(_) => 0,
                };
                self.file = Some(file);
            }
            Err(source) => {
                return Err(RotationError::Reopen {
                    path: self.path.clone(),
                    source,
                })
            }
        }
        result
    }

    fn shift_backups(&self) -> Result<(), RotationError> {
        let oldest = self.backup_path(self.policy.max_backups);
        match fs::remove_file(&oldest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(RotationError::Remove {
                    path: oldest,
                    source,
                })
            }
        }

        for index in (1..self.policy.max_backups).rev() {
            let from = self.backup_path(index);
            if !from.exists() {
                continue;
            }
            let to = self.backup_path(index + 1);
            fs::rename(&from, &to).map_err(|source| RotationError::Rename { from, to, source })?;
        }

        let first = self.backup_path(1);
        fs::rename(&self.path, &first).map_err(|source| RotationError::Rename {
            from: self.path.clone(),
            to: first,
            source,
        })
    }
}
