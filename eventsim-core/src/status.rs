//! Status notifications for capture and consumption sessions
//!
//! Each session gets its own channel, created before the session starts so
//! that early notifications such as `connecting` are never lost.

use crate::error::{Result, SimulatorError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

/// Lifecycle tag carried by a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Connected,
    /// Capture stored an event
    Capturing,
    /// Consumption received an event
    Receiving,
    Completed,
    Closed,
    Error,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Capturing => "capturing",
            SessionStatus::Receiving => "receiving",
            SessionStatus::Completed => "completed",
            SessionStatus::Closed => "closed",
            SessionStatus::Error => "error",
            SessionStatus::Stopped => "stopped",
        }
    }

    /// Whether no further notifications follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Closed
                | SessionStatus::Error
                | SessionStatus::Stopped
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: SessionStatus,
    pub message: String,
    /// Running event count for the session
    pub event_count: usize,
    /// Last received payload, when it parsed as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(status: SessionStatus, message: impl Into<String>, event_count: usize) -> Self {
        Self {
            status,
            message: message.into(),
            event_count,
            last_event: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_last_event(mut self, event: Option<Value>) -> Self {
        self.last_event = event;
        self
    }
}

pub type StatusReceiver = mpsc::UnboundedReceiver<StatusUpdate>;

/// Create a status channel for one session
pub fn status_channel() -> (StatusEmitter, StatusReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (StatusEmitter { sender }, receiver)
}

/// Clonable sending side of a status channel.
///
/// Emitting never blocks and never fails; notifications sent after the
/// receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct StatusEmitter {
    sender: mpsc::UnboundedSender<StatusUpdate>,
}

impl StatusEmitter {
    pub fn emit(&self, update: StatusUpdate) {
        tracing::trace!(status = %update.status, count = update.event_count, "{}", update.message);
        let _ = self.sender.send(update);
    }

    pub fn connecting(&self, url: &str) {
        self.emit(StatusUpdate::new(
            SessionStatus::Connecting,
            format!("Connecting to {}", url),
            0,
        ));
    }

    pub fn connected(&self, url: &str) {
        self.emit(StatusUpdate::new(
            SessionStatus::Connected,
            format!("Connected to {}", url),
            0,
        ));
    }

    pub fn completed(&self, event_count: usize, message: impl Into<String>) {
        self.emit(StatusUpdate::new(SessionStatus::Completed, message, event_count));
    }

    pub fn error(&self, event_count: usize, message: impl Into<String>) {
        self.emit(StatusUpdate::new(SessionStatus::Error, message, event_count));
    }
}

/// Single result of a session, resolved exactly once
#[derive(Debug)]
pub struct SessionCompletion<T> {
    receiver: oneshot::Receiver<Result<T>>,
    _guard: Option<DropGuard>,
}

impl<T> SessionCompletion<T> {
    /// Wait for the session's result
    pub async fn wait(self) -> Result<T> {
        self.receiver.await.map_err(|_| {
            SimulatorError::Other("session ended without reporting a result".to_string())
        })?
    }
}

/// Caller's view of a running capture or consumption session
#[derive(Debug)]
pub struct SessionHandle<T> {
    id: Uuid,
    statuses: StatusReceiver,
    completion: SessionCompletion<T>,
}

impl<T> SessionHandle<T> {
    pub(crate) fn new(
        id: Uuid,
        statuses: StatusReceiver,
        completion: oneshot::Receiver<Result<T>>,
    ) -> Self {
        Self {
            id,
            statuses,
            completion: SessionCompletion {
                receiver: completion,
                _guard: None,
            },
        }
    }

    /// Cancel `token` when the handle (or its completion) is dropped
    pub(crate) fn cancel_on_drop(mut self, token: CancellationToken) -> Self {
        self.completion._guard = Some(token.drop_guard());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next notification; `None` once the session has ended and every
    /// notification was read
    pub async fn next_status(&mut self) -> Option<StatusUpdate> {
        self.statuses.recv().await
    }

    /// Wait for the session's result, discarding unread notifications
    pub async fn wait(self) -> Result<T> {
        self.completion.wait().await
    }

    /// Split into notifications and result
    pub fn into_parts(self) -> (StatusReceiver, SessionCompletion<T>) {
        (self.statuses, self.completion)
    }
}
