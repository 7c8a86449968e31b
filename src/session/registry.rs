//! PTY session registry
//!
//! Maps PTY ids to live sessions. Every operation is scoped to a caller
//! session id: a PTY that belongs to another session is reported as not
//! found.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::task;
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::Config;
use crate::core::Snapshot;
use crate::logs::{LogWriter, RotationPolicy};
use crate::pty::{Pty, SpawnCommand};
use crate::stream::Subscription;

use super::error::{Error, Result};
use super::session::{CreateRequest, PtyInfo, PtySession};

/// Registry settings, taken from [`Config`]
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub log_dir: PathBuf,
    pub rotation: RotationPolicy,
    pub kill_grace: Duration,
    pub channel_capacity: usize,
}

impl From<&Config> for RegistryOptions {
    fn from(config: &Config) -> Self {
        Self {
            log_dir: config.logs.dir.clone(),
            rotation: config.logs.rotation(),
            kill_grace: config.session.kill_grace(),
            channel_capacity: config.stream.channel_capacity,
        }
    }
}

#[derive(Debug)]
pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<PtySession>>>,
    options: RegistryOptions,
}

impl Registry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            options,
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<PtySession>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<PtySession>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self, session_id: &str, pty_id: &str) -> Result<Arc<PtySession>> {
        match self.read().get(pty_id) {
            Some(session) if session.session_id() == session_id => Ok(Arc::clone(session)),
            _ => Err(Error::NotFound(pty_id.to_string())),
        }
    }

    /// Spawn a child in a new PTY and register it
    pub async fn create(&self, session_id: &str, request: CreateRequest) -> Result<String> {
        request.validate()?;

        let pty_id = format!("pty_{}", Uuid::new_v4().simple());
        let mut command = SpawnCommand::new(request.cmd[0].clone())
            .args(request.cmd[1..].iter().cloned())
            .size(request.cols, request.rows);
        command.cwd = request.cwd.clone();
        command.env = request.env.clone();

        let pty = match task::spawn_blocking(move || Pty::spawn(&command)).await {
            Ok(result) => result.map_err(Error::Spawn)?,
            Err(e) => {
                return Err(Error::Spawn(
                    std::io::Error::other(format!("spawn task failed: {e}")).into(),
                ))
            }
        };

        let log = LogWriter::new(
            self.options.log_dir.join(format!("{pty_id}.log")),
            self.options.rotation,
        );
        let session = Arc::new(PtySession::new(
            pty_id.clone(),
            session_id.to_string(),
            request,
            pty,
            log,
            self.options.channel_capacity,
        ));
        if let Err(e) = session.start() {
            session.hangup();
            return Err(e);
        }
        self.write().insert(pty_id.clone(), Arc::clone(&session));

        info!(
            pty_id = %pty_id,
            session_id = %session_id,
            cmd = ?session.cmd(),
            "PTY created"
        );
        Ok(pty_id)
    }

    /// PTY ids of a session, oldest first
    pub fn list(&self, session_id: &str) -> Vec<String> {
        let mut sessions: Vec<_> = self
            .read()
            .values()
            .filter(|session| session.session_id() == session_id)
            .map(|session| (session.created_at(), session.id().to_string()))
            .collect();
        sessions.sort();
        sessions.into_iter().map(|(_, id)| id).collect()
    }

    pub fn info(&self, session_id: &str, pty_id: &str) -> Result<PtyInfo> {
        Ok(self.session(session_id, pty_id)?.info())
    }

    pub fn input(&self, session_id: &str, pty_id: &str, data: &[u8]) -> Result<()> {
        self.session(session_id, pty_id)?.write_input(data)
    }

    pub fn resize(&self, session_id: &str, pty_id: &str, cols: u16, rows: u16) -> Result<()> {
        let session = self.session(session_id, pty_id)?;
        session.resize(cols, rows)
    }

    pub fn snapshot(&self, session_id: &str, pty_id: &str) -> Result<Snapshot> {
        Ok(self.session(session_id, pty_id)?.snapshot())
    }

    pub fn restore(&self, session_id: &str, pty_id: &str, snapshot: &Snapshot) -> Result<()> {
        self.session(session_id, pty_id)?.restore(snapshot);
        Ok(())
    }

    /// Open a stream: `Snapshot` first, then live output, then `Exit`
    pub fn subscribe(&self, session_id: &str, pty_id: &str) -> Result<Subscription> {
        let session = self.session(session_id, pty_id)?;
        debug!(pty_id = %pty_id, "subscriber attached");
        Ok(session.subscribe())
    }

    /// Remove a PTY and terminate its process group.
    ///
    /// Killing an unknown or already removed PTY succeeds.
    pub fn kill(&self, session_id: &str, pty_id: &str) -> Result<()> {
        let session = {
            let mut sessions = self.write();
            match sessions.get(pty_id) {
                Some(session) if session.session_id() == session_id => sessions.remove(pty_id),
                _ => None,
            }
        };
        let Some(session) = session else {
            debug!(pty_id = %pty_id, "kill of unknown PTY ignored");
            return Ok(());
        };

        session.mark_reaped();
        if session.exit_status().is_some() {
            info!(pty_id = %pty_id, "removed exited PTY");
            return Ok(());
        }

        session.hangup();
        let grace = self.options.kill_grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    session.force_kill();
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(grace);
                    session.force_kill();
                });
            }
        }
        info!(pty_id = %pty_id, "PTY killed");
        Ok(())
    }

    /// Drop exited PTYs whose exit is older than `older_than`
    pub fn reap_exited(&self, older_than: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut sessions = self.write();
        let expired: Vec<String> = sessions
            .values()
            .filter(|session| matches!(session.exited_at(), Some(at) if at <= cutoff))
            .map(|session| session.id().to_string())
            .collect();
        for pty_id in &expired {
            if let Some(session) = sessions.remove(pty_id) {
                session.mark_reaped();
                debug!(pty_id = %pty_id, "reaped exited PTY");
            }
        }
        expired.len()
    }

    /// Kill every PTY. Used on server shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.write().drain().map(|(_, session)| session).collect();
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "terminating PTYs");
        for session in &sessions {
            session.mark_reaped();
            session.hangup();
        }
        tokio::time::sleep(self.options.kill_grace.min(Duration::from_millis(500))).await;
        for session in &sessions {
            session.force_kill();
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PtyStatus;
    use crate::stream::StreamEvent;
    use tokio::time::{sleep, timeout};

    fn registry(dir: &std::path::Path) -> Registry {
        Registry::new(RegistryOptions {
            log_dir: dir.to_path_buf(),
            rotation: RotationPolicy::default(),
            kill_grace: Duration::from_millis(200),
            channel_capacity: 64,
        })
    }

    fn sh(script: &str) -> CreateRequest {
        CreateRequest::new(["sh", "-c", script], 80, 24)
    }

    /// Collect events until `Exit` or the stream ends
    async fn collect_events(subscription: &mut Subscription) -> Vec<StreamEvent> {
        timeout(Duration::from_secs(10), async {
            let mut events = Vec::new();
            while let Some(event) = subscription.next_event().await {
                let done = event.is_exit();
                events.push(event);
                if done {
                    break;
                }
            }
            events
        })
        .await
        .expect("timed out waiting for PTY events")
    }

    async fn wait_for_exit(registry: &Registry, session_id: &str, pty_id: &str) -> PtyInfo {
        timeout(Duration::from_secs(10), async {
            loop {
                let info = registry.info(session_id, pty_id).unwrap();
                if info.exit.is_some() {
                    return info;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("timed out waiting for exit")
    }

    fn output_text(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Data { data } => Some(data.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_validates_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let empty = CreateRequest::new(Vec::<String>::new(), 80, 24);
        assert!(matches!(
            registry.create("s1", empty).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.create("s1", CreateRequest::new(["sh"], 0, 24)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            registry
                .create("s1", CreateRequest::new(["sh"], u16::MAX, u16::MAX))
                .await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_unknown_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let request = CreateRequest::new(["definitely-not-a-real-program-xyz"], 80, 24);
        assert!(matches!(
            registry.create("s1", request).await,
            Err(Error::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn test_echo_stream() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry
            .create("s1", sh("sleep 0.5; echo hello world"))
            .await
            .unwrap();
        assert!(pty_id.starts_with("pty_"));

        let mut subscription = registry.subscribe("s1", &pty_id).unwrap();
        let events = collect_events(&mut subscription).await;

        assert_eq!(events.first().map(StreamEvent::name), Some("snapshot"));
        assert!(output_text(&events).contains("hello world"));
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Exit {
                code: 0,
                signal: None
            })
        );
        assert_eq!(subscription.next_event().await, None);

        let snapshot = registry.snapshot("s1", &pty_id).unwrap();
        assert!(snapshot.text().contains("hello world"));
    }

    #[tokio::test]
    async fn test_subscribe_after_exit_yields_snapshot_then_exit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry.create("s1", sh("printf done; exit 3")).await.unwrap();
        let info = wait_for_exit(&registry, "s1", &pty_id).await;
        assert_eq!(info.status, PtyStatus::Exited);

        let mut subscription = registry.subscribe("s1", &pty_id).unwrap();
        let events = collect_events(&mut subscription).await;
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::Snapshot { data } => {
                assert!(Snapshot::decode(data).unwrap().text().contains("done"))
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert_eq!(
            events[1],
            StreamEvent::Exit {
                code: 3,
                signal: None
            }
        );
    }

    #[tokio::test]
    async fn test_two_subscribers_both_start_with_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry
            .create("s1", sh("echo one; sleep 0.3; echo two"))
            .await
            .unwrap();

        let mut a = registry.subscribe("s1", &pty_id).unwrap();
        let mut b = registry.subscribe("s1", &pty_id).unwrap();
        assert_eq!(registry.info("s1", &pty_id).unwrap().subscribers, 2);

        let (events_a, events_b) = tokio::join!(collect_events(&mut a), collect_events(&mut b));
        assert_eq!(events_a[0].name(), "snapshot");
        assert_eq!(events_b[0].name(), "snapshot");
        assert!(events_a.last().is_some_and(StreamEvent::is_exit));
        assert!(events_b.last().is_some_and(StreamEvent::is_exit));
    }

    #[tokio::test]
    async fn test_input_reaches_child() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry.create("s1", CreateRequest::new(["cat"], 80, 24)).await.unwrap();
        let mut subscription = registry.subscribe("s1", &pty_id).unwrap();

        registry.input("s1", &pty_id, b"ping\n").unwrap();

        let text = timeout(Duration::from_secs(10), async {
            let mut text = String::new();
            while let Some(event) = subscription.next_event().await {
                if let StreamEvent::Data { data } = event {
                    text.push_str(&data);
                    if text.contains("ping") {
                        break;
                    }
                }
            }
            text
        })
        .await
        .unwrap();
        assert!(text.contains("ping"));

        registry.kill("s1", &pty_id).unwrap();
    }

    #[tokio::test]
    async fn test_input_after_exit_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry.create("s1", sh("exit 0")).await.unwrap();
        wait_for_exit(&registry, "s1", &pty_id).await;

        assert!(matches!(
            registry.input("s1", &pty_id, b"x"),
            Err(Error::Write { .. })
        ));
        assert!(matches!(
            registry.resize("s1", &pty_id, 100, 30),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resize_updates_screen() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry.create("s1", sh("sleep 5")).await.unwrap();

        registry.resize("s1", &pty_id, 100, 30).unwrap();
        let snapshot = registry.snapshot("s1", &pty_id).unwrap();
        assert_eq!((snapshot.cols, snapshot.rows), (100, 30));
        assert!(matches!(
            registry.resize("s1", &pty_id, 0, 30),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.resize("s1", &pty_id, 80, u16::MAX),
            Err(Error::InvalidArgument(_))
        ));
        let snapshot = registry.snapshot("s1", &pty_id).unwrap();
        assert_eq!((snapshot.cols, snapshot.rows), (100, 30));

        registry.kill("s1", &pty_id).unwrap();
    }

    #[tokio::test]
    async fn test_session_scoping() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry.create("s1", sh("sleep 5")).await.unwrap();

        assert_eq!(registry.list("s1"), vec![pty_id.clone()]);
        assert!(registry.list("s2").is_empty());
        assert!(matches!(
            registry.snapshot("s2", &pty_id),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.subscribe("s2", &pty_id),
            Err(Error::NotFound(_))
        ));

        // Killing from another session is a no-op
        registry.kill("s2", &pty_id).unwrap();
        assert_eq!(registry.list("s1"), vec![pty_id.clone()]);

        registry.kill("s1", &pty_id).unwrap();
        assert!(registry.list("s1").is_empty());
        registry.kill("s1", &pty_id).unwrap();
    }

    #[tokio::test]
    async fn test_dropped_subscriber_keeps_pty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry.create("s1", sh("sleep 5")).await.unwrap();

        let subscription = registry.subscribe("s1", &pty_id).unwrap();
        drop(subscription);

        let info = registry.info("s1", &pty_id).unwrap();
        assert_eq!(info.status, PtyStatus::Running);
        assert_eq!(info.subscribers, 0);
        assert_eq!(registry.list("s1"), vec![pty_id.clone()]);

        registry.kill("s1", &pty_id).unwrap();
    }

    #[tokio::test]
    async fn test_kill_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry.create("s1", sh("sleep 30")).await.unwrap();
        let mut subscription = registry.subscribe("s1", &pty_id).unwrap();

        registry.kill("s1", &pty_id).unwrap();
        let events = collect_events(&mut subscription).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Exit { .. })
        ));
    }

    #[tokio::test]
    async fn test_restore_broadcasts_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry.create("s1", sh("sleep 5")).await.unwrap();
        let mut subscription = registry.subscribe("s1", &pty_id).unwrap();
        assert_eq!(subscription.next_event().await.map(|e| e.name()), Some("snapshot"));

        let mut terminal = crate::terminal::Terminal::new(20, 5);
        terminal.process(b"restored text");
        registry.restore("s1", &pty_id, &terminal.snapshot()).unwrap();

        let event = timeout(Duration::from_secs(5), subscription.next_event())
            .await
            .unwrap();
        match event {
            Some(StreamEvent::Snapshot { data }) => {
                let snapshot = Snapshot::decode(&data).unwrap();
                assert_eq!((snapshot.cols, snapshot.rows), (80, 24));
                assert!(snapshot.text().contains("restored text"));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        registry.kill("s1", &pty_id).unwrap();
    }

    #[tokio::test]
    async fn test_output_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let pty_id = registry.create("s1", sh("printf logged")).await.unwrap();
        wait_for_exit(&registry, "s1", &pty_id).await;

        let log = std::fs::read(dir.path().join(format!("{pty_id}.log"))).unwrap();
        assert_eq!(String::from_utf8_lossy(&log), "logged");
    }

    #[tokio::test]
    async fn test_reap_exited() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let done = registry.create("s1", sh("exit 0")).await.unwrap();
        let running = registry.create("s1", sh("sleep 5")).await.unwrap();
        wait_for_exit(&registry, "s1", &done).await;

        assert_eq!(registry.reap_exited(Duration::from_secs(3600)), 0);
        assert_eq!(registry.reap_exited(Duration::ZERO), 1);
        assert_eq!(registry.list("s1"), vec![running.clone()]);

        registry.shutdown().await;
        assert!(registry.is_empty());
    }
}
