//! A single PTY session
//!
//! Owns the child process, the screen it renders into, its output log and
//! its broadcaster. The reader thread is the only producer: under the state
//! lock it feeds each chunk to the terminal and the broadcaster, then
//! appends the chunk to the log under a separate lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{Snapshot, MAX_COLS, MAX_ROWS};
use crate::logs::LogWriter;
use crate::pty::{ExitStatus, Pty, WindowSize};
use crate::stream::{Broadcaster, StreamEvent, Subscription, Utf8Decoder};
use crate::terminal::Terminal;

use super::error::{Error, Result};

const READ_BUFFER_SIZE: usize = 8192;

/// Lifecycle of a PTY session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PtyStatus {
    Created,
    Running,
    Exited,
    Reaped,
}

/// Point-in-time description of a PTY session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PtyInfo {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
    pub status: PtyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitStatus>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub subscribers: usize,
}

/// Arguments for spawning a session
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub cmd: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

impl CreateRequest {
    pub fn new<I, S>(cmd: I, cols: u16, rows: u16) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            cwd: None,
            env: HashMap::new(),
            cols,
            rows,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self.cmd.first() {
            None => return Err(Error::InvalidArgument("cmd must not be empty".into())),
            Some(program) if program.is_empty() => {
                return Err(Error::InvalidArgument("program must not be empty".into()))
            }
            Some(_) => {}
        }
        validate_size(self.cols, self.rows)
    }
}

pub(crate) fn validate_size(cols: u16, rows: u16) -> Result<()> {
    if cols == 0 || rows == 0 {
        return Err(Error::InvalidArgument(format!(
            "size must be positive, got {cols}x{rows}"
        )));
    }
    if usize::from(cols) > MAX_COLS || usize::from(rows) > MAX_ROWS {
        return Err(Error::InvalidArgument(format!(
            "size {cols}x{rows} exceeds {MAX_COLS}x{MAX_ROWS}"
        )));
    }
    Ok(())
}

/// Everything the state lock guards
#[derive(Debug)]
struct SessionState {
    terminal: Terminal,
    status: PtyStatus,
    exit: Option<ExitStatus>,
    exited_at: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
    decoder: Utf8Decoder,
}

#[derive(Debug)]
pub struct PtySession {
    id: String,
    session_id: String,
    cmd: Vec<String>,
    cwd: Option<PathBuf>,
    created_at: DateTime<Utc>,
    pty: Pty,
    state: Mutex<SessionState>,
    log: Mutex<LogWriter>,
    events: Broadcaster,
}

impl PtySession {
    pub(crate) fn new(
        id: String,
        session_id: String,
        request: CreateRequest,
        pty: Pty,
        log: LogWriter,
        channel_capacity: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            session_id,
            cmd: request.cmd,
            cwd: request.cwd,
            created_at: now,
            pty,
            state: Mutex::new(SessionState {
                terminal: Terminal::new(request.cols as usize, request.rows as usize),
                status: PtyStatus::Created,
                exit: None,
                exited_at: None,
                last_activity: now,
                decoder: Utf8Decoder::new(),
            }),
            log: Mutex::new(log),
            events: Broadcaster::new(channel_capacity),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> PtyStatus {
        self.lock_state().status
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.lock_state().exit
    }

    /// When the child exited, if it has
    pub fn exited_at(&self) -> Option<DateTime<Utc>> {
        self.lock_state().exited_at
    }

    pub fn info(&self) -> PtyInfo {
        let state = self.lock_state();
        let screen = state.terminal.screen();
        PtyInfo {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            cmd: self.cmd.clone(),
            cwd: self.cwd.clone(),
            cols: screen.width() as u16,
            rows: screen.height() as u16,
            status: state.status,
            exit: state.exit,
            created_at: self.created_at,
            last_activity: state.last_activity,
            subscribers: self.events.subscriber_count(),
        }
    }

    /// Start the reader thread and move to `Running`
    pub(crate) fn start(self: &Arc<Self>) -> Result<()> {
        let session = Arc::clone(self);
        thread::Builder::new()
            .name(format!("pty-reader-{}", self.id))
            .spawn(move || session.read_loop())
            .map_err(|e| Error::Spawn(e.into()))?;

        let mut state = self.lock_state();
        // The child may already be gone
        if state.status == PtyStatus::Created {
            state.status = PtyStatus::Running;
        }
        Ok(())
    }

    fn read_loop(self: Arc<Self>) {
        debug!(pty_id = %self.id, "reader started");
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match self.pty.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.ingest(&buf[..n]),
                Err(e) => {
                    warn!(pty_id = %self.id, error = %e, "PTY read failed");
                    break;
                }
            }
        }

        let status = match self.pty.wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(pty_id = %self.id, error = %e, "failed to wait for child");
                ExitStatus::exited(-1)
            }
        };
        self.finish(status);
    }

    fn ingest(&self, chunk: &[u8]) {
        {
            let mut state = self.lock_state();
            state.terminal.process(chunk);
            state.last_activity = Utc::now();
            let text = state.decoder.decode(chunk);
            if !text.is_empty() {
                self.events.send(StreamEvent::Data { data: text });
            }
        }

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = log.write(chunk) {
            warn!(pty_id = %self.id, path = %log.path().display(), error = %e, "failed to write output log");
        }
    }

    fn finish(&self, status: ExitStatus) {
        {
            let mut state = self.lock_state();
            let tail = state.decoder.finish();
            if !tail.is_empty() {
                self.events.send(StreamEvent::Data { data: tail });
            }
            let now = Utc::now();
            if state.status != PtyStatus::Reaped {
                state.status = PtyStatus::Exited;
            }
            state.exit = Some(status);
            state.exited_at = Some(now);
            state.last_activity = now;
            self.events.send(status.into());
        }

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = log.flush() {
            warn!(pty_id = %self.id, error = %e, "failed to flush output log");
        }
        info!(
            pty_id = %self.id,
            session_id = %self.session_id,
            code = status.code,
            signal = ?status.signal,
            "PTY exited"
        );
    }

    pub fn write_input(&self, data: &[u8]) -> Result<()> {
        {
            let mut state = self.lock_state();
            if state.status != PtyStatus::Running {
                return Err(Error::Write {
                    pty_id: self.id.clone(),
                    reason: "process is not running".into(),
                });
            }
            state.last_activity = Utc::now();
        }
        self.pty.write_all(data).map_err(|e| Error::Write {
            pty_id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        validate_size(cols, rows)?;
        let mut state = self.lock_state();
        if state.status != PtyStatus::Running {
            return Err(Error::NotFound(self.id.clone()));
        }
        self.pty
            .resize(WindowSize::new(cols, rows))
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        state.terminal.resize(cols as usize, rows as usize);
        debug!(pty_id = %self.id, cols, rows, "resized");
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock_state().terminal.snapshot()
    }

    /// Seed the screen from a snapshot and push the result to subscribers
    pub fn restore(&self, snapshot: &Snapshot) {
        let mut state = self.lock_state();
        state.terminal.restore(snapshot);
        let data = state.terminal.snapshot().encode();
        self.events.send(StreamEvent::Snapshot { data });
    }

    pub fn subscribe(&self) -> Subscription {
        let state = self.lock_state();
        let snapshot = state.terminal.snapshot().encode();
        self.events.subscribe(&self.id, snapshot, state.exit)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    pub(crate) fn hangup(&self) {
        if let Err(e) = self.pty.signal_group(nix::sys::signal::Signal::SIGHUP) {
            warn!(pty_id = %self.id, error = %e, "failed to send SIGHUP");
        }
    }

    pub(crate) fn force_kill(&self) {
        if self.pty.has_exited() {
            return;
        }
        warn!(pty_id = %self.id, "child ignored SIGHUP, sending SIGKILL");
        if let Err(e) = self.pty.signal_group(nix::sys::signal::Signal::SIGKILL) {
            warn!(pty_id = %self.id, error = %e, "failed to send SIGKILL");
        }
    }

    pub(crate) fn mark_reaped(&self) {
        self.lock_state().status = PtyStatus::Reaped;
    }
}
