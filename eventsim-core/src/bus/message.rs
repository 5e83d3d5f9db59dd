//! Wire messages exchanged over the bus

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration messages understood by the interception context.
///
/// Wire shape (JSON):
/// `{"message": "event_source_url", "event_source_url": ".."}`
/// `{"message": "fake_events", "fake_events": [..], "event_source_url": ".."}`
/// `{"message": "send_close_event", "send_close_event": true, "event_source_url": ".."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum BusMessage {
    /// Ensure a registry entry exists for the endpoint
    EventSourceUrl { event_source_url: String },

    /// Replace the endpoint's recorded events
    FakeEvents {
        fake_events: Vec<String>,
        event_source_url: String,
    },

    /// Replace the endpoint's close-event flag
    SendCloseEvent {
        send_close_event: bool,
        event_source_url: String,
    },
}

impl BusMessage {
    /// Announce an endpoint
    pub fn event_source_url(endpoint_id: impl Into<String>) -> Self {
        BusMessage::EventSourceUrl {
            event_source_url: endpoint_id.into(),
        }
    }

    /// Replace an endpoint's events
    pub fn fake_events(endpoint_id: impl Into<String>, events: Vec<String>) -> Self {
        BusMessage::FakeEvents {
            fake_events: events,
            event_source_url: endpoint_id.into(),
        }
    }

    /// Set an endpoint's close flag
    pub fn send_close_event(endpoint_id: impl Into<String>, flag: bool) -> Self {
        BusMessage::SendCloseEvent {
            send_close_event: flag,
            event_source_url: endpoint_id.into(),
        }
    }

    /// Endpoint this message targets
    pub fn endpoint_id(&self) -> &str {
        match self {
            BusMessage::EventSourceUrl { event_source_url }
            | BusMessage::FakeEvents {
                event_source_url, ..
            }
            | BusMessage::SendCloseEvent {
                event_source_url, ..
            } => event_source_url,
        }
    }

    /// Message discriminator
    pub fn kind(&self) -> MessageKind {
        match self {
            BusMessage::EventSourceUrl { .. } => MessageKind::EventSourceUrl,
            BusMessage::FakeEvents { .. } => MessageKind::FakeEvents,
            BusMessage::SendCloseEvent { .. } => MessageKind::SendCloseEvent,
        }
    }
}

/// Known values of the `message` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    EventSourceUrl,
    FakeEvents,
    SendCloseEvent,
}

impl MessageKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::EventSourceUrl => "event_source_url",
            MessageKind::FakeEvents => "fake_events",
            MessageKind::SendCloseEvent => "send_close_event",
        }
    }

    fn from_wire(name: &str) -> Option<Self> {
        match name {
            "event_source_url" => Some(MessageKind::EventSourceUrl),
            "fake_events" => Some(MessageKind::FakeEvents),
            "send_close_event" => Some(MessageKind::SendCloseEvent),
            _ => None,
        }
    }
}

/// Classification of a raw payload received from the bus
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Well-formed, known message
    Message(BusMessage),
    /// `message` field names a type nobody handles
    Unknown(String),
    /// Not an object, no `message` field, or fields of the wrong shape
    Malformed,
}

impl Inbound {
    /// Classify a raw JSON payload
    pub fn classify(payload: &Value) -> Self {
        let Some(name) = payload.get("message").and_then(Value::as_str) else {
            return Inbound::Malformed;
        };
        if MessageKind::from_wire(name).is_none() {
            return Inbound::Unknown(name.to_string());
        }
        match serde_json::from_value::<BusMessage>(payload.clone()) {
            Ok(message) => Inbound::Message(message),
            Err(_) => Inbound::Malformed,
        }
    }
}
