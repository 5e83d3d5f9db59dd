//! Capture engine
//!
//! Records a live stream into the stored event log. At most one capture is
//! active per engine; starting another stops the running one first.

use crate::error::{Result, SimulatorError, TransportFailure};
use crate::playback::is_close_sentinel;
use crate::status::{SessionHandle, SessionStatus, StatusEmitter, StatusUpdate, status_channel};
use crate::store::EventLog;
use crate::transport::{EventSourceConnection, EventSourceConnector, ReadyState, TransportEvent};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a capture ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureOutcome {
    /// `completed` or `stopped`
    pub status: SessionStatus,
    /// Events stored by this capture, sentinel included
    pub total_events: usize,
}

/// Handle to a running capture
pub type CaptureHandle = SessionHandle<CaptureOutcome>;

struct ActiveCapture {
    id: Uuid,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Records events from `capture_url` into an [`EventLog`]
pub struct CaptureEngine {
    connector: Arc<dyn EventSourceConnector>,
    log: EventLog,
    capture_url: Option<String>,
    active: Arc<Mutex<Option<ActiveCapture>>>,
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("capture_url", &self.capture_url)
            .field("log", &self.log)
            .finish()
    }
}

impl CaptureEngine {
    pub fn new(
        connector: Arc<dyn EventSourceConnector>,
        log: EventLog,
        capture_url: Option<String>,
    ) -> Self {
        Self {
            connector,
            log,
            capture_url,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn capture_url(&self) -> Option<&str> {
        self.capture_url.as_deref()
    }

    /// Whether a capture is running
    pub async fn is_capturing(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Start capturing.
    ///
    /// Fails with a configuration error, without connecting, when no capture
    /// URL is configured.
    pub async fn start_capture(&self) -> Result<CaptureHandle> {
        let url = self
            .capture_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                SimulatorError::Configuration("capture_url is required to start a capture".to_string())
            })?;

        let (statuses, receiver) = status_channel();
        let (done, completion) = oneshot::channel();
        let id = Uuid::new_v4();
        let stop = CancellationToken::new();
        let driver = CaptureDriver {
            id,
            url,
            connector: self.connector.clone(),
            log: self.log.clone(),
            statuses,
            stop: stop.clone(),
            active: self.active.clone(),
        };

        // The previous driver must be gone before the new one touches the log
        loop {
            let mut active = self.active.lock().await;
            let Some(previous) = active.take() else {
                let task = tokio::spawn(async move {
                    let result = driver.run().await;
                    let _ = done.send(result);
                });
                *active = Some(ActiveCapture { id, stop, task });
                break;
            };
            drop(active);

            info!(capture = %previous.id, "Stopping active capture before starting a new one");
            previous.stop.cancel();
            if let Err(e) = previous.task.await {
                warn!(capture = %previous.id, "Capture task failed: {}", e);
            }
        }

        info!(capture = %id, "Capture started");
        Ok(SessionHandle::new(id, receiver, completion))
    }

    /// Stop the active capture. Returns `false` when nothing was running.
    ///
    /// Taking the capture out of the active slot decides the race with a
    /// capture that is ending on its own: once taken, the capture always
    /// reports `stopped`.
    pub async fn stop_capture(&self) -> bool {
        let Some(active) = self.active.lock().await.take() else {
            return false;
        };
        active.stop.cancel();
        if let Err(e) = active.task.await {
            warn!(capture = %active.id, "Capture task failed: {}", e);
        }
        info!(capture = %active.id, "Capture stopped");
        true
    }
}

/// How the capture loop ended, before the terminal status is emitted
enum Ending {
    Completed(usize),
    Stopped(usize),
    Failed {
        count: usize,
        message: String,
        error: SimulatorError,
    },
}

struct CaptureDriver {
    id: Uuid,
    url: String,
    connector: Arc<dyn EventSourceConnector>,
    log: EventLog,
    statuses: StatusEmitter,
    stop: CancellationToken,
    active: Arc<Mutex<Option<ActiveCapture>>>,
}

impl CaptureDriver {
    async fn run(self) -> Result<CaptureOutcome> {
        let ending = self.capture().await;

        // Still in the slot means nobody stopped us
        let stopped_by_caller = {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|a| a.id == self.id) {
                *active = None;
                false
            } else {
                true
            }
        };

        match ending {
            Ending::Stopped(count) => Ok(self.stopped(count)),
            Ending::Completed(count) | Ending::Failed { count, .. } if stopped_by_caller => {
                Ok(self.stopped(count))
            }
            Ending::Completed(count) => Ok(self.completed(count)),
            Ending::Failed {
                count,
                message,
                error,
            } => {
                self.statuses.error(count, message);
                Err(error)
            }
        }
    }

    async fn capture(&self) -> Ending {
        self.statuses.connecting(&self.url);

        let connected = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Ending::Stopped(0),
            connected = self.connector.connect(&self.url) => connected,
        };
        let mut connection = match connected {
            Ok(connection) => connection,
            Err(error) => {
                return Ending::Failed {
                    count: 0,
                    message: format!("Error: {}", error),
                    error,
                };
            }
        };

        let mut count = 0;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    connection.close();
                    return Ending::Stopped(count);
                }
                event = connection.next_event() => event,
            };

            match event {
                Some(TransportEvent::Open) => self.statuses.connected(&self.url),
                Some(TransportEvent::Message(event)) => {
                    if let Err(error) = self.log.append(event.data.as_str()).await {
                        connection.close();
                        warn!(capture = %self.id, "Failed to store captured event: {}", error);
                        return Ending::Failed {
                            count,
                            message: format!("Error: {}", error),
                            error,
                        };
                    }
                    count += 1;

                    let parsed = match serde_json::from_str::<Value>(&event.data) {
                        Ok(value) => Some(value),
                        Err(e) => {
                            warn!(capture = %self.id, "Captured payload is not JSON: {}", e);
                            None
                        }
                    };
                    let is_sentinel = parsed.as_ref().is_some_and(is_close_sentinel);
                    self.statuses.emit(
                        StatusUpdate::new(
                            SessionStatus::Capturing,
                            format!("Captured {} events", count),
                            count,
                        )
                        .with_last_event(parsed),
                    );

                    if is_sentinel {
                        connection.close();
                        return Ending::Completed(count);
                    }
                }
                Some(TransportEvent::Closed) => {
                    connection.close();
                    return Ending::Completed(count);
                }
                Some(TransportEvent::Error {
                    ready_state,
                    detail,
                }) => return self.failed(&mut connection, ready_state, detail, count),
                None => {
                    let ready_state = connection.ready_state();
                    return self.failed(&mut connection, ready_state, "stream ended", count);
                }
            }
        }
    }

    fn completed(&self, count: usize) -> CaptureOutcome {
        info!(capture = %self.id, total_events = count, "Capture completed");
        self.statuses
            .completed(count, format!("Capture completed. Total events: {}", count));
        CaptureOutcome {
            status: SessionStatus::Completed,
            total_events: count,
        }
    }

    fn stopped(&self, count: usize) -> CaptureOutcome {
        debug!(capture = %self.id, "Capture manually stopped");
        self.statuses.emit(StatusUpdate::new(
            SessionStatus::Stopped,
            "Capture manually stopped",
            count,
        ));
        CaptureOutcome {
            status: SessionStatus::Stopped,
            total_events: count,
        }
    }

    fn failed(
        &self,
        connection: &mut EventSourceConnection,
        ready_state: ReadyState,
        detail: impl Into<String>,
        count: usize,
    ) -> Ending {
        connection.close();
        let failure = TransportFailure::new(&self.url, ready_state, detail);
        warn!(capture = %self.id, detail = %failure.detail, "{}", failure);
        Ending::Failed {
            count,
            message: "EventSource connection failed".to_string(),
            error: failure.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EventStore, InMemoryEventStore};
    use crate::transport::EventStream;
    use async_trait::async_trait;
    use futures::{StreamExt, stream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Connector replaying a fixed list of transport events
    struct ScriptedConnector {
        script: Vec<TransportEvent>,
        connects: AtomicUsize,
        hang: bool,
    }

    impl ScriptedConnector {
        fn new(script: Vec<TransportEvent>) -> Arc<Self> {
            Arc::new(Self {
                script,
                connects: AtomicUsize::new(0),
                hang: false,
            })
        }

        fn hanging(script: Vec<TransportEvent>) -> Arc<Self> {
            Arc::new(Self {
                script,
                connects: AtomicUsize::new(0),
                hang: true,
            })
        }
    }

    #[async_trait]
    impl EventSourceConnector for ScriptedConnector {
        async fn connect(&self, url: &str) -> Result<EventSourceConnection> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let events = stream::iter(self.script.clone());
            let events: EventStream = if self.hang {
                Box::pin(events.chain(stream::pending()))
            } else {
                Box::pin(events)
            };
            Ok(EventSourceConnection::new(url, events))
        }
    }

    fn message(data: &str) -> TransportEvent {
        TransportEvent::Message(crate::transport::SseEvent {
            data: data.to_string(),
            ..Default::default()
        })
    }

    fn log() -> EventLog {
        EventLog::new(Arc::new(InMemoryEventStore::new()), "fakeEvents")
    }

    #[tokio::test]
    async fn missing_capture_url_rejects_without_connecting() {
        let connector = ScriptedConnector::new(vec![]);
        let engine = CaptureEngine::new(connector.clone(), log(), None);
        let err = engine.start_capture().await.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stores_events_until_sentinel() {
        let connector = ScriptedConnector::new(vec![
            TransportEvent::Open,
            message("{\"id\":1}"),
            message("{\"id\":2}"),
            message("{\"id\":\"CLOSE\"}"),
            message("{\"id\":3}"),
        ]);
        let log = log();
        let engine = CaptureEngine::new(connector, log.clone(), Some("/source".into()));

        let mut handle = engine.start_capture().await.unwrap();
        let mut statuses = Vec::new();
        while let Some(update) = handle.next_status().await {
            statuses.push(update);
        }
        let outcome = handle.wait().await.unwrap();

        assert_eq!(outcome.status, SessionStatus::Completed);
        assert_eq!(outcome.total_events, 3);
        assert_eq!(
            log.load().await.unwrap(),
            vec!["{\"id\":1}", "{\"id\":2}", "{\"id\":\"CLOSE\"}"]
        );

        let tags: Vec<_> = statuses.iter().map(|s| s.status).collect();
        assert_eq!(
            tags,
            vec![
                SessionStatus::Connecting,
                SessionStatus::Connected,
                SessionStatus::Capturing,
                SessionStatus::Capturing,
                SessionStatus::Capturing,
                SessionStatus::Completed,
            ]
        );
        assert_eq!(statuses[3].last_event, Some(serde_json::json!({"id": 2})));
        assert!(!engine.is_capturing().await);
    }

    #[tokio::test]
    async fn transport_error_rejects_with_diagnostic() {
        let connector = ScriptedConnector::new(vec![
            TransportEvent::Open,
            message("{\"id\":1}"),
            TransportEvent::Error {
                ready_state: ReadyState::Closed,
                detail: "reset".into(),
            },
        ]);
        let engine = CaptureEngine::new(connector, log(), Some("/source".into()));
        let handle = engine.start_capture().await.unwrap();
        let (mut statuses, completion) = handle.into_parts();

        let err = completion.wait().await.unwrap_err();
        let SimulatorError::Transport(failure) = err else {
            panic!("expected transport failure, got {err:?}");
        };
        assert_eq!(failure.url, "/source");
        assert_eq!(failure.ready_state, ReadyState::Closed);

        let mut last = None;
        while let Some(update) = statuses.recv().await {
            last = Some(update);
        }
        assert_eq!(last.map(|u| u.status), Some(SessionStatus::Error));
    }

    #[tokio::test]
    async fn stop_capture_is_idempotent() {
        let connector = ScriptedConnector::hanging(vec![TransportEvent::Open, message("{\"id\":1}")]);
        let log = log();
        let engine = CaptureEngine::new(connector, log.clone(), Some("/source".into()));
        assert!(!engine.stop_capture().await);

        let mut handle = engine.start_capture().await.unwrap();
        // connecting, connected, capturing
        for _ in 0..3 {
            handle.next_status().await.unwrap();
        }
        assert!(engine.stop_capture().await);
        assert!(!engine.stop_capture().await);

        let stopped = handle.next_status().await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert_eq!(stopped.event_count, 1);
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.status, SessionStatus::Stopped);
        assert_eq!(log.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn new_capture_stops_the_active_one() {
        let connector = ScriptedConnector::hanging(vec![TransportEvent::Open]);
        let engine = CaptureEngine::new(connector.clone(), log(), Some("/source".into()));

        let first = engine.start_capture().await.unwrap();
        let second = engine.start_capture().await.unwrap();

        assert_eq!(first.wait().await.unwrap().status, SessionStatus::Stopped);
        assert!(engine.is_capturing().await);
        assert!(engine.stop_capture().await);
        assert_eq!(second.wait().await.unwrap().status, SessionStatus::Stopped);
    }

    /// Store whose writes wait for a permit
    struct GatedStore {
        inner: InMemoryEventStore,
        permits: Semaphore,
    }

    #[async_trait]
    impl EventStore for GatedStore {
        async fn get(&self, name: &str) -> Result<Option<String>> {
            self.inner.get(name).await
        }

        async fn set(&self, name: &str, value: &str) -> Result<()> {
            self.permits
                .acquire()
                .await
                .map_err(|e| SimulatorError::Storage(e.to_string()))?
                .forget();
            self.inner.set(name, value).await
        }
    }

    #[tokio::test]
    async fn stop_wins_over_a_capture_ending_on_its_own() {
        let store = Arc::new(GatedStore {
            inner: InMemoryEventStore::new(),
            permits: Semaphore::new(0),
        });
        let connector = ScriptedConnector::new(vec![
            TransportEvent::Open,
            message("{\"id\":\"CLOSE\"}"),
        ]);
        let engine = Arc::new(CaptureEngine::new(
            connector,
            EventLog::new(store.clone(), "fakeEvents"),
            Some("/source".into()),
        ));

        let mut handle = engine.start_capture().await.unwrap();
        // connecting, connected; the sentinel is now waiting on the store
        for _ in 0..2 {
            handle.next_status().await.unwrap();
        }

        let stopper = tokio::spawn({
            let engine = engine.clone();
            async move { engine.stop_capture().await }
        });
        while engine.is_capturing().await {
            tokio::task::yield_now().await;
        }
        store.permits.add_permits(1);

        assert!(stopper.await.unwrap());
        let mut tags = Vec::new();
        while let Some(update) = handle.next_status().await {
            tags.push(update.status);
        }
        assert_eq!(tags, vec![SessionStatus::Capturing, SessionStatus::Stopped]);
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.status, SessionStatus::Stopped);
        assert_eq!(outcome.total_events, 1);
    }

    #[tokio::test]
    async fn new_capture_starts_after_the_previous_one_finished_writing() {
        let store = Arc::new(GatedStore {
            inner: InMemoryEventStore::new(),
            permits: Semaphore::new(0),
        });
        let connector = ScriptedConnector::hanging(vec![TransportEvent::Open, message("a")]);
        let engine = Arc::new(CaptureEngine::new(
            connector.clone(),
            EventLog::new(store.clone(), "fakeEvents"),
            Some("/source".into()),
        ));

        let mut first = engine.start_capture().await.unwrap();
        for _ in 0..2 {
            first.next_status().await.unwrap();
        }

        let restart = tokio::spawn({
            let engine = engine.clone();
            async move { engine.start_capture().await }
        });
        while engine.is_capturing().await {
            tokio::task::yield_now().await;
        }
        // The first capture still holds its pending write
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        store.permits.add_permits(2);
        let mut second = restart.await.unwrap().unwrap();
        assert_eq!(first.wait().await.unwrap().status, SessionStatus::Stopped);

        while let Some(update) = second.next_status().await {
            if update.status == SessionStatus::Capturing {
                break;
            }
        }
        assert!(engine.stop_capture().await);
        assert_eq!(
            store.inner.get("fakeEvents").await.unwrap().as_deref(),
            Some("[\"a\",\"a\"]")
        );
    }
}
