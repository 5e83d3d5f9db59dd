//! Synthetic streamed responses

use super::frame::SSE_HEADERS;
use super::session::{PlaybackHandle, PlaybackSession};
use super::timeline::Timeline;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Body of a synthetic SSE response: a stream of encoded frames.
///
/// Dropping the body is how a consumer aborts; the session notices and
/// cancels its pending timers.
#[derive(Debug)]
pub struct SseBody {
    frames: ReceiverStream<String>,
}

impl SseBody {
    fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self {
            frames: ReceiverStream::new(receiver),
        }
    }
}

impl Stream for SseBody {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

/// A synthetic `200 OK` event-stream response backed by a playback session
#[derive(Debug)]
pub struct SseResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: SseBody,
    pub session: PlaybackHandle,
}

impl SseResponse {
    /// Start a session for `timeline` and wrap its output
    pub fn start(label: impl Into<String>, timeline: Timeline, frame_buffer: usize) -> Self {
        let (sink, receiver) = mpsc::channel(frame_buffer.max(1));
        let session = PlaybackSession::new(label, timeline, sink).spawn();
        Self {
            status: 200,
            headers: SSE_HEADERS
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: SseBody::new(receiver),
            session,
        }
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Split into body and session handle
    pub fn into_parts(self) -> (SseBody, PlaybackHandle) {
        (self.body, self.session)
    }
}
