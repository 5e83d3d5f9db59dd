//! # eventsim - Server-Sent Event Simulator
//!
//! eventsim records, replays and consumes server-sent event streams so that
//! clients can be developed and tested without the real event source:
//! - Capture a live stream into a bounded stored event log
//! - Register endpoints with an interception context over a message bus
//! - Replay stored events at a fixed cadence, with an optional CLOSE sentinel
//! - Consume any SSE endpoint through a one-shot state machine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eventsim_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ConfigBuilder::new()
//!         .event_source_url("/event-simulator-sse")
//!         .build()?;
//!     let (simulator, worker) = EventSimulator::with_interception(config)?;
//!
//!     simulator.register(&worker).await?;
//!     simulator.load_events_from_storage().await?;
//!
//!     let outcome = simulator.test("/event-simulator-sse").await?.wait().await?;
//!     println!("{} events", outcome.total_events);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Two execution contexts talk only through the [`bus::MessageBus`]:
//! - **Interception context**: a [`worker::InterceptionWorker`] task owning the
//!   [`registry::Registry`] and answering requests via the
//!   [`dispatcher::Dispatcher`] and the [`playback`] engine
//! - **Application context**: the [`bootstrap::EventSimulator`] with its
//!   [`capture::CaptureEngine`] and [`consumption::StreamConsumer`]

pub mod bootstrap;
pub mod bus;
pub mod capture;
pub mod config;
pub mod consumption;
pub mod dispatcher;
pub mod error;
pub mod playback;
pub mod registry;
pub mod status;
pub mod store;
pub mod transport;
pub mod worker;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bootstrap::{EventSimulator, RegistrationReport, RegistrationStage};
    pub use crate::bus::{BusEnvelope, BusError, BusMessage, BusSubscription, Inbound, MessageBus};
    pub use crate::capture::{CaptureEngine, CaptureHandle, CaptureOutcome};
    pub use crate::config::{
        BusConfig, ConfigBuilder, PlaybackConfig, SimulatorConfig, StorageConfig, StorageMode,
    };
    pub use crate::consumption::{
        CompletionReason, ConsumptionHandle, ConsumptionOutcome, ConsumptionSession,
        ConsumptionState, StreamConsumer,
    };
    pub use crate::dispatcher::{Dispatcher, InterceptedRequest, Interception, Route};
    pub use crate::error::{Result, SimulatorError, TransportFailure};
    pub use crate::playback::{
        PlaybackHandle, PlaybackOutcome, PlaybackReport, SseBody, SseResponse, Timeline,
    };
    pub use crate::registry::{EndpointConfig, Registry};
    pub use crate::status::{SessionHandle, SessionStatus, StatusUpdate};
    pub use crate::store::{EventLog, EventStore, FileEventStore, InMemoryEventStore};
    pub use crate::transport::{
        EventSourceConnection, EventSourceConnector, HttpConnector, InterceptingConnector,
        ReadyState, TransportEvent,
    };
    pub use crate::worker::{
        InterceptionWorker, Interceptor, WorkerLifecycle, WorkerState, wait_until_installed,
        wait_until_ready,
    };
}
