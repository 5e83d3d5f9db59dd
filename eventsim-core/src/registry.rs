//! Configuration registry for simulated endpoints
//!
//! Maps endpoint identifiers to playback configuration. The registry is owned
//! by the interception context and mutated only by bus messages; readers get
//! cloned snapshots, so an in-flight playback never observes later updates.

use crate::bus::{BusMessage, Inbound};
use crate::error::{Result, SimulatorError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Playback configuration for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Path suffix this configuration answers
    pub endpoint_id: String,

    /// Recorded event payloads, replayed in order
    pub events: Vec<String>,

    /// Whether to emit the CLOSE sentinel after the events
    pub send_close_event: bool,
}

impl EndpointConfig {
    /// Empty configuration for an endpoint
    pub fn new(endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            events: Vec::new(),
            send_close_event: false,
        }
    }

    /// Set events
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Set the close flag
    pub fn with_close_event(mut self, flag: bool) -> Self {
        self.send_close_event = flag;
        self
    }

    /// Whether this endpoint answers the given request path
    pub fn matches(&self, path: &str) -> bool {
        path.ends_with(&self.endpoint_id)
    }
}

/// Endpoint registry.
///
/// Entries are kept in registration order; when several endpoint ids are
/// suffixes of the same path, the earliest registered wins.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    entries: Vec<EndpointConfig>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a raw bus payload.
    ///
    /// Malformed payloads are dropped silently. Unknown message types and
    /// rejected messages are logged as protocol warnings.
    pub fn handle_message(&mut self, payload: &Value) {
        let handled = match Inbound::classify(payload) {
            Inbound::Message(message) => self.apply(message),
            Inbound::Unknown(kind) => Err(SimulatorError::Protocol(format!(
                "unknown message type {}",
                kind
            ))),
            Inbound::Malformed => Ok(()),
        };
        if let Err(e) = handled {
            warn!("{}", e);
        }
    }

    /// Apply a typed bus message.
    ///
    /// A message without an endpoint id is rejected with a protocol error and
    /// leaves the registry unchanged.
    pub fn apply(&mut self, message: BusMessage) -> Result<()> {
        if message.endpoint_id().is_empty() {
            return Err(SimulatorError::Protocol(format!(
                "{} message without an endpoint id",
                message.kind().as_str()
            )));
        }

        match message {
            BusMessage::EventSourceUrl { event_source_url } => {
                self.entry_mut(&event_source_url);
            }
            BusMessage::FakeEvents {
                fake_events,
                event_source_url,
            } => {
                debug!(
                    endpoint = %event_source_url,
                    count = fake_events.len(),
                    "Received fake events"
                );
                self.entry_mut(&event_source_url).events = fake_events;
            }
            BusMessage::SendCloseEvent {
                send_close_event,
                event_source_url,
            } => {
                self.entry_mut(&event_source_url).send_close_event = send_close_event;
            }
        }
        Ok(())
    }

    fn entry_mut(&mut self, endpoint_id: &str) -> &mut EndpointConfig {
        let index = match self
            .entries
            .iter()
            .position(|entry| entry.endpoint_id == endpoint_id)
        {
            Some(index) => index,
            None => {
                debug!(endpoint = %endpoint_id, "Added configuration");
                self.entries.push(EndpointConfig::new(endpoint_id));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    /// Look up an entry by exact id
    pub fn get(&self, endpoint_id: &str) -> Option<&EndpointConfig> {
        self.entries
            .iter()
            .find(|entry| entry.endpoint_id == endpoint_id)
    }

    /// Snapshot of the first entry (registration order) matching a request path
    pub fn find_match(&self, path: &str) -> Option<EndpointConfig> {
        self.entries.iter().find(|entry| entry.matches(path)).cloned()
    }

    /// Entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry (interception context restart)
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
