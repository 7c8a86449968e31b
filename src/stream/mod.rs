//! Live output fan-out
//!
//! Each PTY owns one [`Broadcaster`]. Subscribing registers a broadcast
//! receiver together with a snapshot captured under the same session lock
//! the reader thread ingests under, so a subscription always starts with
//! `Snapshot` and never sees a chunk twice. `Exit` is the terminal event.
//!
//! Queues are bounded. A subscriber that falls more than the queue capacity
//! behind is disconnected and has to resubscribe for a fresh snapshot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::pty::ExitStatus;

/// Event delivered to stream subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Full screen state, encoded as a snapshot JSON string
    Snapshot { data: String },
    /// Raw output chunk, decoded as UTF-8
    Data { data: String },
    /// The child exited
    Exit {
        code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
    },
}

impl StreamEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Snapshot { .. } => "snapshot",
            StreamEvent::Data { .. } => "data",
            StreamEvent::Exit { .. } => "exit",
        }
    }

    /// JSON payload without the tag, as sent in the SSE `data:` field
    pub fn payload(&self) -> serde_json::Value {
        match self {
            StreamEvent::Snapshot { data } | StreamEvent::Data { data } => {
                serde_json::json!({ "data": data })
            }
            StreamEvent::Exit { code, signal } => match signal {
                Some(signal) => serde_json::json!({ "code": code, "signal": signal }),
                None => serde_json::json!({ "code": code }),
            },
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, StreamEvent::Exit { .. })
    }
}

impl From<ExitStatus> for StreamEvent {
    fn from(status: ExitStatus) -> Self {
        StreamEvent::Exit {
            code: status.code,
            signal: status.signal,
        }
    }
}

/// Per-PTY fan-out channel
#[derive(Debug)]
pub struct Broadcaster {
    sender: broadcast::Sender<StreamEvent>,
    subscribers: Arc<AtomicUsize>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Deliver an event to every current subscriber
    pub fn send(&self, event: StreamEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Number of open subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Register a subscriber.
    ///
    /// The caller must hold the lock that serializes [`Broadcaster::send`]
    /// so `snapshot` and the receiver describe the same point in the output.
    /// `exit` is the status of an already exited PTY; its `Exit` event was
    /// sent before this receiver existed, so it is replayed here.
    pub fn subscribe(
        &self,
        pty_id: &str,
        snapshot: String,
        exit: Option<ExitStatus>,
    ) -> Subscription {
        let mut pending = VecDeque::with_capacity(2);
        pending.push_back(StreamEvent::Snapshot { data: snapshot });
        let receiver = match exit {
            Some(status) => {
                pending.push_back(status.into());
                None
            }
            None => Some(self.sender.subscribe()),
        };
        Subscription {
            pty_id: pty_id.to_string(),
            pending,
            receiver,
            _guard: SubscriberGuard::new(Arc::clone(&self.subscribers)),
        }
    }
}

/// Counts a live subscription for as long as it exists
#[derive(Debug)]
struct SubscriberGuard {
    count: Arc<AtomicUsize>,
}

impl SubscriberGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self { count }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One subscriber's view of a PTY's output
#[derive(Debug)]
pub struct Subscription {
    pty_id: String,
    pending: VecDeque<StreamEvent>,
    /// Dropped once the stream has ended
    receiver: Option<broadcast::Receiver<StreamEvent>>,
    _guard: SubscriberGuard,
}

impl Subscription {
    pub fn pty_id(&self) -> &str {
        &self.pty_id
    }

    /// Next event, or `None` once the stream is over
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.pending.pop_front() {
            if event.is_exit() {
                self.receiver = None;
            }
            return Some(event);
        }

        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(event) => {
                if event.is_exit() {
                    self.receiver = None;
                }
                Some(event)
            }
            Err(RecvError::Closed) => {
                debug!(pty_id = %self.pty_id, "stream closed");
                self.receiver = None;
                None
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(pty_id = %self.pty_id, skipped, "disconnecting lagging subscriber");
                self.receiver = None;
                self.pending.clear();
                None
            }
        }
    }

    /// Turn the subscription into a stream of events
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures_util::stream::unfold(self, |mut subscription| async move {
            let event = subscription.next_event().await?;
            Some((event, subscription))
        })
    }
}

/// Incremental UTF-8 decoder for output chunks.
///
/// Sequences split across chunks are carried over, invalid bytes become
/// U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial sequence at end of output
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}
