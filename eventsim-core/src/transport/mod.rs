//! Event-source transport
//!
//! An `EventSourceConnection` models a browser `EventSource`: it yields
//! `Open`, one `Message` per dispatched SSE event, an explicit `Closed`
//! signal for events named `close`, and `Error` for connection failures.
//! A server ending the stream is also reported as `Error`, which is what the
//! consumption state machine has to disambiguate.

mod http;
mod simulated;
mod sse_parser;

pub use http::HttpConnector;
pub use simulated::InterceptingConnector;
pub use sse_parser::{SseEvent, SseParser};

use crate::error::Result;
use crate::playback::PlaybackHandle;
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::pin::Pin;

/// Connection state, numbered as in the EventSource interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl Serialize for ReadyState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Signals delivered by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The stream was accepted
    Open,
    /// A dispatched `message` event
    Message(SseEvent),
    /// The source sent an event named `close`
    Closed,
    /// The connection failed or the stream ended
    Error {
        ready_state: ReadyState,
        detail: String,
    },
}

/// Boxed stream of transport events
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Opens event-source connections
#[async_trait]
pub trait EventSourceConnector: Send + Sync {
    /// Open a connection to `url`
    async fn connect(&self, url: &str) -> Result<EventSourceConnection>;
}

/// A live event-source connection, exclusively owned by one session
pub struct EventSourceConnection {
    url: String,
    ready_state: ReadyState,
    events: EventStream,
    playback: Option<PlaybackHandle>,
}

impl std::fmt::Debug for EventSourceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourceConnection")
            .field("url", &self.url)
            .field("ready_state", &self.ready_state)
            .field("simulated", &self.playback.is_some())
            .finish()
    }
}

impl EventSourceConnection {
    /// Wrap an event stream
    pub fn new(url: impl Into<String>, events: EventStream) -> Self {
        Self {
            url: url.into(),
            ready_state: ReadyState::Connecting,
            events,
            playback: None,
        }
    }

    /// Attach the playback session feeding this connection
    pub fn with_playback(mut self, playback: PlaybackHandle) -> Self {
        self.playback = Some(playback);
        self
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current ready state
    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// Next transport event; `None` once closed or exhausted
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.ready_state == ReadyState::Closed {
            return None;
        }
        let event = self.events.next().await;
        match &event {
            Some(TransportEvent::Open) => self.ready_state = ReadyState::Open,
            Some(TransportEvent::Error { ready_state, .. }) => self.ready_state = *ready_state,
            Some(TransportEvent::Closed) | None => self.ready_state = ReadyState::Closed,
            Some(TransportEvent::Message(_)) => {}
        }
        event
    }

    /// Release the connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.cancel_all();
        }
        self.events = Box::pin(stream::empty());
        self.ready_state = ReadyState::Closed;
    }

    /// Whether `close` has been called or the source closed
    pub fn is_closed(&self) -> bool {
        self.ready_state == ReadyState::Closed
    }
}

impl Drop for EventSourceConnection {
    fn drop(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.cancel_all();
        }
    }
}

struct DecodeState<S> {
    chunks: S,
    parser: SseParser,
    pending: VecDeque<TransportEvent>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn push(&mut self, event: SseEvent) {
        match event.event.as_deref() {
            None | Some("message") => self.pending.push_back(TransportEvent::Message(event)),
            Some("close") => self.pending.push_back(TransportEvent::Closed),
            Some(other) => tracing::debug!(event = other, "Ignoring named event"),
        }
    }
}

/// Turn a body of raw chunks into transport events.
///
/// Emits `Open` first, then one event per dispatched SSE frame. A chunk error
/// or the end of the body becomes `Error` with ready-state `Connecting`.
pub(crate) fn decode_event_stream<S, B>(chunks: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, String>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DecodeState {
        chunks,
        parser: SseParser::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let events = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    for event in state.parser.push_bytes(chunk.as_ref()) {
                        state.push(event);
                    }
                }
                Some(Err(detail)) => {
                    state.finished = true;
                    state.pending.push_back(TransportEvent::Error {
                        ready_state: ReadyState::Connecting,
                        detail,
                    });
                }
                None => {
                    if state.parser.discard_incomplete() {
                        tracing::debug!("Discarding unterminated event at end of stream");
                    }
                    state.finished = true;
                    state.pending.push_back(TransportEvent::Error {
                        ready_state: ReadyState::Connecting,
                        detail: "stream ended".to_string(),
                    });
                }
            }
        }
    });

    Box::pin(stream::once(async { TransportEvent::Open }).chain(events))
}

/// A connection whose only event is a failure
pub(crate) fn failed_stream(detail: impl Into<String>) -> EventStream {
    let detail = detail.into();
    Box::pin(stream::once(async move {
        TransportEvent::Error {
            ready_state: ReadyState::Closed,
            detail,
        }
    }))
}
