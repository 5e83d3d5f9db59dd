//! Playback session driver

use super::frame::{close_sentinel, encode_frame, generated_event};
use super::timeline::{Emission, ScheduledEmission, Timeline};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Bag of pending timers owned by one session.
///
/// Cloning shares the same bag. `cancel_all` is synchronous: once it returns,
/// no timer in the bag fires.
#[derive(Debug, Clone)]
pub struct TimerSet {
    token: CancellationToken,
    pending: Arc<AtomicUsize>,
}

impl TimerSet {
    fn new(pending: usize) -> Self {
        Self {
            token: CancellationToken::new(),
            pending: Arc::new(AtomicUsize::new(pending)),
        }
    }

    /// Cancel every pending timer
    pub fn cancel_all(&self) {
        self.token.cancel();
    }

    /// Whether the bag has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Timers that have neither fired nor been cancelled
    pub fn pending(&self) -> usize {
        if self.token.is_cancelled() {
            0
        } else {
            self.pending.load(Ordering::Acquire)
        }
    }

    fn fired(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    fn remaining(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every timer fired and the stream was closed
    Completed,
    /// The consumer went away or the session was cancelled
    Cancelled,
}

/// Summary returned when a session task finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackReport {
    pub session_id: Uuid,
    pub outcome: PlaybackOutcome,
    /// Frames written to the sink
    pub frames_sent: usize,
    /// Timers that were still pending when the session was cancelled
    pub timers_cancelled: usize,
}

/// One replay of a timeline into a frame sink
#[derive(Debug)]
pub struct PlaybackSession {
    id: Uuid,
    label: String,
    timeline: Timeline,
    sink: mpsc::Sender<String>,
}

impl PlaybackSession {
    /// Create a session writing frames into `sink`
    pub fn new(label: impl Into<String>, timeline: Timeline, sink: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            timeline,
            sink,
        }
    }

    /// Session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start the session clock and spawn its driver task
    pub fn spawn(self) -> PlaybackHandle {
        let start = Instant::now();
        let timers = TimerSet::new(self.timeline.len());
        let id = self.id;
        let task = tokio::spawn(self.run(start, timers.clone()));
        PlaybackHandle { id, timers, task }
    }

    async fn run(self, start: Instant, timers: TimerSet) -> PlaybackReport {
        let PlaybackSession {
            id,
            label,
            timeline,
            sink,
        } = self;
        debug!(session = %id, endpoint = %label, timers = timeline.len(), "Playback started");

        let mut frames_sent = 0;
        let cancelled = |frames_sent: usize| {
            let timers_cancelled = timers.remaining();
            timers.cancel_all();
            debug!(session = %id, timers_cancelled, "Stream cancelled, cleaned up timers");
            PlaybackReport {
                session_id: id,
                outcome: PlaybackOutcome::Cancelled,
                frames_sent,
                timers_cancelled,
            }
        };

        for ScheduledEmission { offset, emission } in timeline.into_entries() {
            tokio::select! {
                biased;
                _ = timers.token.cancelled() => return cancelled(frames_sent),
                _ = sink.closed() => return cancelled(frames_sent),
                _ = sleep_until(start + offset) => {}
            }

            let frame = match emission {
                Emission::Data(payload) => encode_frame(&payload),
                Emission::Generated(n) => encode_frame(&generated_event(n)),
                Emission::CloseSentinel => {
                    debug!(session = %id, "Events consumed, sending close event");
                    encode_frame(&close_sentinel())
                }
                Emission::EndOfStream => {
                    timers.fired();
                    debug!(session = %id, frames_sent, "Playback finished, closing stream");
                    return PlaybackReport {
                        session_id: id,
                        outcome: PlaybackOutcome::Completed,
                        frames_sent,
                        timers_cancelled: 0,
                    };
                }
            };

            tokio::select! {
                biased;
                _ = timers.token.cancelled() => return cancelled(frames_sent),
                sent = sink.send(frame) => {
                    if sent.is_err() {
                        return cancelled(frames_sent);
                    }
                }
            }
            timers.fired();
            frames_sent += 1;
        }

        // Timelines always end with EndOfStream
        PlaybackReport {
            session_id: id,
            outcome: PlaybackOutcome::Completed,
            frames_sent,
            timers_cancelled: 0,
        }
    }
}

/// Handle to a running playback session
#[derive(Debug)]
pub struct PlaybackHandle {
    id: Uuid,
    timers: TimerSet,
    task: JoinHandle<PlaybackReport>,
}

impl PlaybackHandle {
    /// Session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The session's timer bag
    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    /// Cancel every pending timer without waiting for the task
    pub fn cancel_all(&self) {
        self.timers.cancel_all();
    }

    /// Cancel the session and wait until its task has stopped
    pub async fn cancel(self) -> PlaybackReport {
        self.timers.cancel_all();
        self.join().await
    }

    /// Wait for the session to finish
    pub async fn join(self) -> PlaybackReport {
        match self.task.await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(session = %self.id, "Playback task failed: {}", err);
                PlaybackReport {
                    session_id: self.id,
                    outcome: PlaybackOutcome::Cancelled,
                    frames_sent: 0,
                    timers_cancelled: 0,
                }
            }
        }
    }
}
