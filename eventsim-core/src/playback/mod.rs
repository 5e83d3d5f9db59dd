//! Timed playback engine
//!
//! Replays an endpoint's recorded events as an SSE response: one frame per
//! cadence tick, an optional CLOSE sentinel, then the stream closes. Each
//! response is driven by its own session task whose pending timers are
//! cancelled as soon as the consumer goes away.

mod frame;
mod response;
mod session;
mod timeline;

pub use frame::{
    CLOSE_EVENT_ID, SSE_HEADERS, close_sentinel, encode_frame, generated_event, is_close_sentinel,
};
pub use response::{SseBody, SseResponse};
pub use session::{PlaybackHandle, PlaybackOutcome, PlaybackReport, PlaybackSession, TimerSet};
pub use timeline::{Emission, ScheduledEmission, Timeline};
