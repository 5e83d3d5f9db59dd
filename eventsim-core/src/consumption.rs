//! Stream consumption state machine
//!
//! Drives a one-shot connect, receive, terminate lifecycle against an SSE
//! endpoint and settles exactly one result. [`ConsumptionSession`] is the
//! pure state machine; [`StreamConsumer`] runs it over a live connection.

use crate::error::{Result, SimulatorError, TransportFailure};
use crate::playback::is_close_sentinel;
use crate::status::{SessionHandle, SessionStatus, StatusUpdate, status_channel};
use crate::transport::{EventSourceConnector, ReadyState, TransportEvent};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// State of a consumption session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionState {
    Connecting,
    Connected,
    /// `n` events received so far
    Receiving(usize),
    Completed,
    Closed,
    Error,
}

impl ConsumptionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsumptionState::Completed | ConsumptionState::Closed | ConsumptionState::Error
        )
    }
}

/// Why a session resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// A frame carried the CLOSE sentinel
    CloseEventReceived,
    /// The transport errored after events arrived and no sentinel was promised
    StreamEnded,
    /// The source sent an explicit close signal
    ConnectionClosed,
}

/// Resolved result of a consumption session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionOutcome {
    pub status: SessionStatus,
    pub total_events: usize,
    pub reason: CompletionReason,
}

/// Effect of feeding one transport event into the machine
#[derive(Debug, Default)]
pub struct Transition {
    /// Notifications to emit, in order
    pub notifications: Vec<StatusUpdate>,
    /// Set exactly once, on the transition into a terminal state
    pub resolution: Option<Result<ConsumptionOutcome>>,
}

impl Transition {
    fn notify(update: StatusUpdate) -> Self {
        Self {
            notifications: vec![update],
            resolution: None,
        }
    }

    fn resolve(notifications: Vec<StatusUpdate>, result: Result<ConsumptionOutcome>) -> Self {
        Self {
            notifications,
            resolution: Some(result),
        }
    }

    /// Whether the connection must be released
    pub fn is_final(&self) -> bool {
        self.resolution.is_some()
    }
}

/// Pure consumption state machine for one connection
#[derive(Debug, Clone)]
pub struct ConsumptionSession {
    url: String,
    close_event_supported: bool,
    state: ConsumptionState,
    received: usize,
}

impl ConsumptionSession {
    pub fn new(url: impl Into<String>, close_event_supported: bool) -> Self {
        Self {
            url: url.into(),
            close_event_supported,
            state: ConsumptionState::Connecting,
            received: 0,
        }
    }

    pub fn state(&self) -> ConsumptionState {
        self.state
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Notification for the initial `connecting` state
    pub fn connecting_status(&self) -> StatusUpdate {
        StatusUpdate::new(
            SessionStatus::Connecting,
            format!("Connecting to test EventSource: {}", self.url),
            0,
        )
    }

    /// Advance on one transport event. Events after a terminal state are
    /// ignored.
    pub fn on_event(&mut self, event: TransportEvent) -> Transition {
        if self.state.is_terminal() {
            debug!(url = %self.url, state = ?self.state, "Ignoring event after session ended");
            return Transition::default();
        }
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(event) => self.on_message(&event.data),
            TransportEvent::Closed => self.on_closed(),
            TransportEvent::Error {
                ready_state,
                detail,
            } => self.on_error(ready_state, detail),
        }
    }

    fn on_open(&mut self) -> Transition {
        if self.state == ConsumptionState::Connecting {
            self.state = ConsumptionState::Connected;
        }
        Transition::notify(StatusUpdate::new(
            SessionStatus::Connected,
            "Connected to test EventSource",
            0,
        ))
    }

    fn on_message(&mut self, data: &str) -> Transition {
        self.received += 1;
        self.state = ConsumptionState::Receiving(self.received);

        let parsed = match serde_json::from_str::<Value>(data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(url = %self.url, "Received payload is not JSON: {}", e);
                None
            }
        };
        let is_sentinel = parsed.as_ref().is_some_and(is_close_sentinel);
        let receiving = StatusUpdate::new(
            SessionStatus::Receiving,
            format!("Received {} events", self.received),
            self.received,
        )
        .with_last_event(parsed);

        if !is_sentinel {
            return Transition::notify(receiving);
        }

        let total_events = self.received;
        info!(url = %self.url, total_events, "Received CLOSE event from server");
        self.state = ConsumptionState::Completed;
        Transition::resolve(
            vec![
                receiving,
                StatusUpdate::new(
                    SessionStatus::Completed,
                    format!("Test completed. Total events received: {}", total_events),
                    total_events,
                ),
            ],
            Ok(ConsumptionOutcome {
                status: SessionStatus::Completed,
                total_events,
                reason: CompletionReason::CloseEventReceived,
            }),
        )
    }

    fn on_error(&mut self, ready_state: ReadyState, detail: String) -> Transition {
        let had_events = self.received > 0;
        self.received = 0;

        // Without a promised sentinel, the server ending the stream is
        // indistinguishable from a failure; events already seen decide.
        if had_events && !self.close_event_supported {
            info!(url = %self.url, "Stream ended after receiving events");
            self.state = ConsumptionState::Completed;
            return Transition::resolve(
                vec![StatusUpdate::new(
                    SessionStatus::Completed,
                    "Stream ended after receiving events",
                    0,
                )],
                Ok(ConsumptionOutcome {
                    status: SessionStatus::Completed,
                    total_events: 0,
                    reason: CompletionReason::StreamEnded,
                }),
            );
        }

        let failure = TransportFailure::new(&self.url, ready_state, detail);
        warn!(url = %self.url, detail = %failure.detail, "{}", failure);
        self.state = ConsumptionState::Error;
        Transition::resolve(
            vec![StatusUpdate::new(
                SessionStatus::Error,
                format!("EventSource connection failed: {}", failure.details_json()),
                0,
            )],
            Err(SimulatorError::Transport(failure)),
        )
    }

    fn on_closed(&mut self) -> Transition {
        self.received = 0;
        self.state = ConsumptionState::Closed;
        Transition::resolve(
            vec![StatusUpdate::new(
                SessionStatus::Closed,
                "EventSource connection closed",
                0,
            )],
            Ok(ConsumptionOutcome {
                status: SessionStatus::Closed,
                total_events: 0,
                reason: CompletionReason::ConnectionClosed,
            }),
        )
    }
}

/// Handle to a running consumption session. Dropping it (or its
/// completion) aborts the session and releases the connection.
pub type ConsumptionHandle = SessionHandle<ConsumptionOutcome>;

/// Runs consumption sessions over connections from a connector
#[derive(Clone)]
pub struct StreamConsumer {
    connector: Arc<dyn EventSourceConnector>,
    close_event_supported: bool,
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("close_event_supported", &self.close_event_supported)
            .finish()
    }
}

impl StreamConsumer {
    pub fn new(connector: Arc<dyn EventSourceConnector>, close_event_supported: bool) -> Self {
        Self {
            connector,
            close_event_supported,
        }
    }

    /// Start consuming `url`
    pub async fn consume(&self, url: &str) -> Result<ConsumptionHandle> {
        if url.is_empty() {
            return Err(SimulatorError::Configuration(
                "an event source URL is required".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let (statuses, receiver) = status_channel();
        let (done, completion) = oneshot::channel();
        let cancel = CancellationToken::new();
        let mut session = ConsumptionSession::new(url, self.close_event_supported);
        statuses.emit(session.connecting_status());

        let connector = self.connector.clone();
        let token = cancel.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            debug!(session = %id, url = %url, "Opening event source");
            let connected = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                connected = connector.connect(&url) => connected,
            };
            let mut connection = match connected {
                Ok(connection) => connection,
                Err(e) => {
                    statuses.error(0, format!("EventSource connection failed: {}", e));
                    let _ = done.send(Err(e));
                    return;
                }
            };

            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(session = %id, "Consumption aborted");
                        connection.close();
                        return;
                    }
                    event = connection.next_event() => event,
                };
                let event = event.unwrap_or_else(|| TransportEvent::Error {
                    ready_state: connection.ready_state(),
                    detail: "event stream exhausted".to_string(),
                });

                let transition = session.on_event(event);
                for update in transition.notifications {
                    statuses.emit(update);
                }
                if let Some(result) = transition.resolution {
                    connection.close();
                    let _ = done.send(result);
                    return;
                }
            }
        });

        Ok(SessionHandle::new(id, receiver, completion).cancel_on_drop(cancel))
    }
}
